use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use thiserror::Error;

/// Per-file size ceiling (5 MB).
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

const BUCKETS: [&str; 4] = ["images", "csv", "docs", "config"];

/// What an uploaded file is for, derived from its multipart field name.
/// Purpose decides the storage bucket and the content-type allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPurpose {
    Logo,
    Banner,
    Csv,
    Config,
    Document,
}

impl UploadPurpose {
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "logoFile" => Some(UploadPurpose::Logo),
            "bannerFile" => Some(UploadPurpose::Banner),
            "csvFile" => Some(UploadPurpose::Csv),
            "configFile" => Some(UploadPurpose::Config),
            "docFiles" => Some(UploadPurpose::Document),
            _ => None,
        }
    }

    pub fn field_name(self) -> &'static str {
        match self {
            UploadPurpose::Logo => "logoFile",
            UploadPurpose::Banner => "bannerFile",
            UploadPurpose::Csv => "csvFile",
            UploadPurpose::Config => "configFile",
            UploadPurpose::Document => "docFiles",
        }
    }

    pub fn bucket(self) -> &'static str {
        match self {
            UploadPurpose::Logo | UploadPurpose::Banner => "images",
            UploadPurpose::Csv => "csv",
            UploadPurpose::Document => "docs",
            UploadPurpose::Config => "config",
        }
    }

    pub fn allowed_types(self) -> &'static [&'static str] {
        match self {
            UploadPurpose::Logo | UploadPurpose::Banner => {
                &["image/jpeg", "image/png", "image/gif"]
            }
            UploadPurpose::Csv => &["text/csv", "application/vnd.ms-excel"],
            UploadPurpose::Document => &[
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ],
            UploadPurpose::Config => &["application/json", "text/plain"],
        }
    }

    pub fn accepts(self, content_type: &str) -> bool {
        self.allowed_types().contains(&content_type)
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("unexpected upload field '{field}'")]
    UnknownField { field: String },

    #[error("file for '{field}' is {size} bytes, over the {MAX_UPLOAD_BYTES} byte limit")]
    TooLarge { field: String, size: u64 },

    #[error("invalid content type '{content_type}' for '{field}'; allowed: {allowed}")]
    UnsupportedType {
        field: String,
        content_type: String,
        allowed: String,
    },
}

impl ClassifyError {
    /// The multipart field that caused the rejection.
    pub fn field(&self) -> &str {
        match self {
            ClassifyError::UnknownField { field }
            | ClassifyError::TooLarge { field, .. }
            | ClassifyError::UnsupportedType { field, .. } => field,
        }
    }
}

/// A classified attachment: its purpose plus a bucket-relative path with
/// forward-slash separators regardless of host conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub purpose: UploadPurpose,
    pub relative_path: String,
}

/// Routes uploads into per-purpose buckets under a provisioned root.
///
/// Construct once at startup with [`UploadStore::provision`] and inject
/// wherever classification is needed; classification itself never touches
/// the filesystem, so there is no ambient directory initialization.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Create the bucket directories under `root` (idempotent).
    pub fn provision(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for bucket in BUCKETS {
            std::fs::create_dir_all(root.join(bucket))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a declared upload and pick its stored location. The bytes
    /// themselves are persisted by the caller at [`Self::absolute_path`].
    pub fn classify(
        &self,
        field: &str,
        original_name: &str,
        content_type: &str,
        size: u64,
    ) -> Result<StoredUpload, ClassifyError> {
        let purpose =
            UploadPurpose::from_field(field).ok_or_else(|| ClassifyError::UnknownField {
                field: field.to_string(),
            })?;
        if size > MAX_UPLOAD_BYTES {
            return Err(ClassifyError::TooLarge {
                field: field.to_string(),
                size,
            });
        }
        if !purpose.accepts(content_type) {
            return Err(ClassifyError::UnsupportedType {
                field: field.to_string(),
                content_type: content_type.to_string(),
                allowed: purpose.allowed_types().join(", "),
            });
        }
        Ok(StoredUpload {
            purpose,
            relative_path: format!("{}/{}", purpose.bucket(), stored_name(field, original_name)),
        })
    }

    /// Host path for a classified upload.
    pub fn absolute_path(&self, upload: &StoredUpload) -> PathBuf {
        let mut path = self.root.clone();
        for part in upload.relative_path.split('/') {
            path.push(part);
        }
        path
    }
}

/// Collision-resistant stored filename: field, millisecond timestamp,
/// random suffix, original extension.
fn stored_name(field: &str, original_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{field}-{millis}-{suffix}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UploadStore {
        let dir = tempfile::tempdir().unwrap();
        UploadStore::provision(dir.path()).unwrap()
    }

    #[test]
    fn provision_creates_all_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::provision(dir.path()).unwrap();
        for bucket in BUCKETS {
            assert!(store.root().join(bucket).is_dir());
        }
        // idempotent
        UploadStore::provision(dir.path()).unwrap();
    }

    #[test]
    fn fields_route_to_their_buckets() {
        let store = store();
        let logo = store.classify("logoFile", "logo.png", "image/png", 10).unwrap();
        assert!(logo.relative_path.starts_with("images/"));
        let banner = store.classify("bannerFile", "b.gif", "image/gif", 10).unwrap();
        assert!(banner.relative_path.starts_with("images/"));
        let csv = store.classify("csvFile", "data.csv", "text/csv", 10).unwrap();
        assert!(csv.relative_path.starts_with("csv/"));
        let cfg = store.classify("configFile", "c.json", "application/json", 10).unwrap();
        assert!(cfg.relative_path.starts_with("config/"));
        let doc = store.classify("docFiles", "d.pdf", "application/pdf", 10).unwrap();
        assert!(doc.relative_path.starts_with("docs/"));
    }

    #[test]
    fn unknown_field_is_rejected_by_name() {
        let err = store()
            .classify("avatarFile", "a.png", "image/png", 10)
            .unwrap_err();
        assert_eq!(err.field(), "avatarFile");
        assert!(matches!(err, ClassifyError::UnknownField { .. }));
    }

    #[test]
    fn pdf_is_rejected_as_logo_but_accepted_as_document() {
        let store = store();
        let err = store
            .classify("logoFile", "file.pdf", "application/pdf", 10)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::UnsupportedType { .. }));
        assert_eq!(err.field(), "logoFile");

        store
            .classify("docFiles", "file.pdf", "application/pdf", 10)
            .unwrap();
    }

    #[test]
    fn size_ceiling_is_enforced() {
        let store = store();
        store
            .classify("logoFile", "l.png", "image/png", MAX_UPLOAD_BYTES)
            .unwrap();
        let err = store
            .classify("logoFile", "l.png", "image/png", MAX_UPLOAD_BYTES + 1)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::TooLarge { .. }));
    }

    #[test]
    fn stored_names_keep_extension_and_differ() {
        let a = stored_name("logoFile", "photo.PNG");
        let b = stored_name("logoFile", "photo.PNG");
        assert!(a.starts_with("logoFile-"));
        assert!(a.ends_with(".PNG"));
        assert_ne!(a, b);

        let bare = stored_name("csvFile", "noextension");
        assert!(!bare.contains('.'));
    }

    #[test]
    fn absolute_path_splits_on_forward_slashes() {
        let store = store();
        let upload = store
            .classify("csvFile", "rows.csv", "text/csv", 10)
            .unwrap();
        let abs = store.absolute_path(&upload);
        assert!(abs.starts_with(store.root()));
        assert_eq!(
            abs.parent().unwrap().file_name().unwrap().to_str().unwrap(),
            "csv"
        );
    }
}
