// src/upload.rs

use std::io::Cursor;
use std::path::Path;

/// File types the estimate uploader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Jpg,
    Png,
}

impl DocumentKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// An uploaded repair estimate held in memory.
#[derive(Debug)]
pub struct Upload {
    pub file_name: String,
    pub content: Cursor<Vec<u8>>,
}

impl Upload {
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content: Cursor::new(bytes),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "estimate".to_string());
        Ok(Self::from_bytes(file_name, bytes))
    }

    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_file_name(&self.file_name)
    }
}
