//! Image records.
//!
//! No layers are stored. Pulling an image records metadata so that list
//! and inspect answer consistently, and the image ID is a stable digest
//! of the tagged reference.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::ImageRecord;

use super::Engine;

impl Engine {
    /// Records an image reference. Used by both explicit pulls and
    /// container creation, so every container's image shows up in list.
    pub(crate) fn ensure_image(&self, reference: &str) -> Result<ImageRecord> {
        let tagged = ensure_tag(reference);
        if let Ok(existing) = self.state.get_image(&tagged) {
            return Ok(existing);
        }
        let record = ImageRecord {
            id: image_id(&tagged),
            repo_tags: vec![tagged],
            created: Utc::now(),
            size: 0,
        };
        self.state.insert_image(record.clone())?;
        Ok(record)
    }

    /// `POST /images/create` equivalent. Idempotent.
    pub fn pull_image(&self, reference: &str) -> Result<ImageRecord> {
        self.ensure_image(reference)
    }

    pub fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let mut list = self.state.list_images()?;
        list.sort_by(|a, b| a.repo_tags.cmp(&b.repo_tags));
        Ok(list)
    }

    /// Looks an image up by tag, ID, or untagged name.
    pub fn inspect_image(&self, reference: &str) -> Result<ImageRecord> {
        self.state
            .get_image(reference)
            .or_else(|_| self.state.get_image(&ensure_tag(reference)))
    }
}

/// Appends `:latest` to references without an explicit tag.
fn ensure_tag(reference: &str) -> String {
    // A colon after the last slash is a tag; earlier ones are a registry port.
    let after_slash = reference.rsplit('/').next().unwrap_or(reference);
    if after_slash.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

fn image_id(tagged: &str) -> String {
    let digest = Sha256::digest(tagged.as_bytes());
    let mut hex = String::with_capacity(71);
    hex.push_str("sha256:");
    for b in digest {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::super::testutil::sandbox_engine;
    use super::*;

    #[test]
    fn tag_defaulting() {
        assert_eq!(ensure_tag("alpine"), "alpine:latest");
        assert_eq!(ensure_tag("alpine:3.19"), "alpine:3.19");
        assert_eq!(ensure_tag("registry:5000/app"), "registry:5000/app:latest");
        assert_eq!(ensure_tag("registry:5000/app:v2"), "registry:5000/app:v2");
    }

    #[tokio::test]
    async fn pull_is_idempotent_and_listable() {
        let (engine, _dir) = sandbox_engine();
        let first = engine.pull_image("alpine").unwrap();
        let second = engine.pull_image("alpine:latest").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(engine.list_images().unwrap().len(), 1);

        assert_eq!(engine.inspect_image("alpine").unwrap().id, first.id);
        assert_eq!(engine.inspect_image(&first.id).unwrap().id, first.id);
        assert_eq!(
            engine.inspect_image("missing").unwrap_err().status_code(),
            404
        );
    }
}
