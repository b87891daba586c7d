use std::path::Path;

use serde::{Deserialize, Serialize};

/// Coarse classification of a transferred file, derived from its
/// extension. Used for UI grouping only, never for policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Document,
    Archive,
    Other,
}

impl Default for FileType {
    fn default() -> Self {
        FileType::Other
    }
}

impl FileType {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "svg" | "heic" | "ico") => {
                FileType::Image
            }
            Some("mp4" | "mkv" | "avi" | "mov" | "webm" | "flv" | "wmv" | "m4v") => FileType::Video,
            Some(
                "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "md" | "odt"
                | "rtf" | "csv",
            ) => FileType::Document,
            Some("zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" | "zst") => FileType::Archive,
            _ => FileType::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(FileType::from_path("photo.JPG"), FileType::Image);
        assert_eq!(FileType::from_path("clip.mkv"), FileType::Video);
        assert_eq!(FileType::from_path("report.pdf"), FileType::Document);
        assert_eq!(FileType::from_path("backup.tar"), FileType::Archive);
        assert_eq!(FileType::from_path("demo.bin"), FileType::Other);
        assert_eq!(FileType::from_path("no_extension"), FileType::Other);
    }

    #[test]
    fn test_serde_rendering() {
        assert_eq!(
            serde_json::to_string(&FileType::Archive).unwrap(),
            "\"archive\""
        );
        let parsed: FileType = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(parsed, FileType::Image);
    }
}
