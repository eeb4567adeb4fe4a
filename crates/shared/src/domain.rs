use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(ReportId);
id_newtype!(EntryId);

/// A file selected by the user, read into memory before upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.filename.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Extensions the analysis endpoint accepts.
pub const TABULAR_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

/// Extensions the categorization endpoint accepts.
pub const CATEGORIZE_EXTENSIONS: &[&str] = &["xml"];

pub fn has_allowed_extension(upload: &FileUpload, allowed: &[&str]) -> bool {
    upload
        .extension()
        .map(|ext| allowed.iter().any(|candidate| *candidate == ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        let upload = FileUpload::new("Week_12.XLSX", Vec::new());
        assert_eq!(upload.extension().as_deref(), Some("xlsx"));
        assert!(has_allowed_extension(&upload, TABULAR_EXTENSIONS));
    }

    #[test]
    fn missing_extension_is_rejected() {
        let upload = FileUpload::new("notes", Vec::new());
        assert_eq!(upload.extension(), None);
        assert!(!has_allowed_extension(&upload, CATEGORIZE_EXTENSIONS));

        let trailing_dot = FileUpload::new("notes.", Vec::new());
        assert_eq!(trailing_dot.extension(), None);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ReportId::new("abc-123");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"abc-123\"");
        assert_eq!(id.to_string(), "abc-123");
        assert_ne!(EntryId::generate(), EntryId::generate());
    }
}
