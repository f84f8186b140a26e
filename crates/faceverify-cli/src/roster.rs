//! Read-only staff roster loaded from TOML.
//!
//! ```toml
//! [[staff]]
//! staff_id = "EMP001"
//! name = "Ada Example"
//! department = "Engineering"
//! photo = "photos/emp001.jpg"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid roster: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("staff member not found or inactive: {0}")]
    NotFound(String),
    #[error("no reference photo on file for staff member {0}")]
    NoReferencePhoto(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffMember {
    pub staff_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default, skip_serializing)]
    pub photo: Option<PathBuf>,
    #[serde(default = "default_active", skip_serializing)]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    staff: Vec<StaffMember>,
}

#[derive(Debug, Clone)]
pub struct Roster {
    staff: Vec<StaffMember>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let roster = Self::parse(&text, base_dir)?;
        tracing::debug!(path = %path.display(), members = roster.staff.len(), "roster loaded");
        Ok(roster)
    }

    /// Parse roster text, resolving relative photo paths against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, RosterError> {
        let file: RosterFile = toml::from_str(text)?;
        let staff = file
            .staff
            .into_iter()
            .map(|mut member| {
                member.photo = member.photo.map(|p| {
                    if p.is_relative() {
                        base_dir.join(p)
                    } else {
                        p
                    }
                });
                member
            })
            .collect();
        Ok(Self { staff })
    }

    /// Find an active member with a reference photo.
    pub fn lookup(&self, staff_id: &str) -> Result<(&StaffMember, &Path), RosterError> {
        let member = self
            .staff
            .iter()
            .find(|m| m.staff_id == staff_id && m.active)
            .ok_or_else(|| RosterError::NotFound(staff_id.to_string()))?;
        let photo = member
            .photo
            .as_deref()
            .ok_or_else(|| RosterError::NoReferencePhoto(staff_id.to_string()))?;
        Ok((member, photo))
    }

    pub fn active(&self) -> impl Iterator<Item = &StaffMember> {
        self.staff.iter().filter(|m| m.active)
    }
}
