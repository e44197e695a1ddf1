//! POSIX-subset shell interpreter.
//!
//! Covers the scripting surface container entrypoints actually use:
//! pipelines, `&&`/`||`/`;` lists, file redirects, parameter and command
//! substitution, `$(( ))` arithmetic, and the `-e`/`-o pipefail` modes.
//! No job control, no control-flow keywords, no interactive mode.

mod arith;
mod exec;
mod lexer;
mod parser;

pub use exec::{Shell, ShellEnv, EXIT_CODE_SYNTAX};
pub use lexer::{Word, WordPart};
pub use parser::parse;
