//! Attachment loading collaborator: classify a path by MIME type and load
//! it as text or a base64 image payload.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use waypoint_engine::{Attachment, AttachmentKind, AttachmentLoader};

pub struct FsAttachmentLoader;

impl AttachmentLoader for FsAttachmentLoader {
    fn load(&self, path: &Path) -> Result<Attachment> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attachment")
            .to_string();
        let mime_type = mime_guess::from_path(path).first_or_octet_stream();

        if mime_type.type_() == mime_guess::mime::IMAGE {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read attachment {}", path.display()))?;
            Ok(Attachment {
                filename,
                mime_type: mime_type.essence_str().to_string(),
                kind: AttachmentKind::Image,
                content: BASE64.encode(bytes),
            })
        } else {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read attachment {}", path.display()))?;
            Ok(Attachment {
                filename,
                mime_type: mime_type.essence_str().to_string(),
                kind: AttachmentKind::Text,
                content,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_files_load_as_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        fs::write(&path, "remember the outage").expect("write");

        let attachment = FsAttachmentLoader.load(&path).expect("load");
        assert_eq!(attachment.kind, AttachmentKind::Text);
        assert_eq!(attachment.mime_type, "text/plain");
        assert_eq!(attachment.content, "remember the outage");
        assert_eq!(attachment.filename, "notes.txt");
    }

    #[test]
    fn images_load_as_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pixel.png");
        fs::write(&path, [0x89, 0x50, 0x4e, 0x47]).expect("write");

        let attachment = FsAttachmentLoader.load(&path).expect("load");
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(
            BASE64.decode(&attachment.content).expect("decode"),
            vec![0x89, 0x50, 0x4e, 0x47]
        );
    }

    #[test]
    fn missing_files_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(FsAttachmentLoader.load(&dir.path().join("gone.txt")).is_err());
    }
}
