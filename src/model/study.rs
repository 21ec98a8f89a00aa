use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pipeline kinds, one per supported study type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyKind {
    /// Cone-beam CT volume (multi-branch report + slice export)
    Cbct,
    /// Panoramic radiograph (linear chain)
    Pano,
    /// Standalone NIfTI volume (slice export only)
    Nifti,
}

impl StudyKind {
    /// All kinds with a registered pipeline definition
    pub fn all() -> [StudyKind; 3] {
        [Self::Cbct, Self::Pano, Self::Nifti]
    }

    /// Whether the study payload is a volumetric scan rather than a 2D image
    pub fn is_volumetric(&self) -> bool {
        matches!(self, Self::Cbct | Self::Nifti)
    }
}

impl fmt::Display for StudyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbct => write!(f, "cbct"),
            Self::Pano => write!(f, "pano"),
            Self::Nifti => write!(f, "nifti"),
        }
    }
}

impl std::str::FromStr for StudyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cbct" => Ok(Self::Cbct),
            "pano" => Ok(Self::Pano),
            "nifti" => Ok(Self::Nifti),
            _ => Err(format!("Invalid study kind: {s}")),
        }
    }
}

/// Reference to one uploaded study as staged by the intake service.
///
/// Carries everything the built-in stages need to locate the staged file
/// and to derive object-storage paths (`{clinic}/{patient}/{kind}/{run}/...`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyRef {
    /// Stable identifier assigned at intake
    pub study_id: String,
    /// Clinic the study belongs to (first storage path segment)
    pub clinic_id: String,
    /// Patient within the clinic (second storage path segment)
    pub patient_id: String,
    /// Where the intake service staged the raw upload
    pub staged_path: PathBuf,
    /// Original filename as uploaded, extension intact
    pub original_filename: String,
    /// Size of the staged file in bytes, as reported at intake
    pub size_bytes: u64,
}

impl StudyRef {
    /// Lowercased extension of the original filename, with compound
    /// `.nii.gz` preserved as a single extension
    pub fn extension(&self) -> Option<String> {
        let name = self.original_filename.to_lowercase();
        if name.ends_with(".nii.gz") {
            return Some(".nii.gz".to_string());
        }
        name.rfind('.').map(|idx| name[idx..].to_string())
    }
}
