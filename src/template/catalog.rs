//! Built-in templates and how a request selects one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Built-in template selected by the `template_type` form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    #[default]
    Doctor,
    Hr,
}

impl TemplateKind {
    /// Parse a selector. Anything other than `hr` selects the doctor template.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "hr" => TemplateKind::Hr,
            _ => TemplateKind::Doctor,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            TemplateKind::Doctor => "doctor_template.docx",
            TemplateKind::Hr => "hr_template.docx",
        }
    }

    pub fn download_name(self) -> &'static str {
        match self {
            TemplateKind::Doctor => "medical_note.docx",
            TemplateKind::Hr => "hr_document.docx",
        }
    }

    pub fn path_in(self, template_dir: &Path) -> PathBuf {
        template_dir.join(self.file_name())
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Doctor => write!(f, "doctor"),
            TemplateKind::Hr => write!(f, "hr"),
        }
    }
}

/// Download name for documents generated from an uploaded template.
pub const CUSTOM_DOWNLOAD_NAME: &str = "custom_document.docx";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_falls_back_to_doctor() {
        assert_eq!(TemplateKind::from_selector(Some("hr")), TemplateKind::Hr);
        assert_eq!(TemplateKind::from_selector(Some(" HR ")), TemplateKind::Hr);
        assert_eq!(TemplateKind::from_selector(Some("doctor")), TemplateKind::Doctor);
        assert_eq!(TemplateKind::from_selector(Some("lawyer")), TemplateKind::Doctor);
        assert_eq!(TemplateKind::from_selector(None), TemplateKind::Doctor);
    }

    #[test]
    fn test_file_and_download_names() {
        assert_eq!(TemplateKind::Hr.file_name(), "hr_template.docx");
        assert_eq!(TemplateKind::Doctor.download_name(), "medical_note.docx");
        assert_eq!(
            TemplateKind::Doctor.path_in(Path::new("templates")),
            Path::new("templates").join("doctor_template.docx")
        );
    }
}
