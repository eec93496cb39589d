//! Template catalog matching.
//!
//! Tags are normalized (lower-case, synonym table) and matched against a
//! fixed, ordered catalog per project side. A template matches when every
//! normalized tag appears as a substring of the lower-cased template
//! identifier; the first match in catalog order wins. There is no scoring.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::TemplateError;

/// Which half of a project a template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectSide {
    Frontend,
    Backend,
}

impl ProjectSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectSide::Frontend => "frontend",
            ProjectSide::Backend => "backend",
        }
    }

    /// Catalog subdirectory name (`Frontend` / `Backend`).
    fn dir_name(&self) -> &'static str {
        match self {
            ProjectSide::Frontend => "Frontend",
            ProjectSide::Backend => "Backend",
        }
    }
}

const FRONTEND_TEMPLATES: &[&str] = &[
    "react-js-npm-vite",
    "react-js-npm-webpack",
    "react-ts-npm-vite",
    "react-ts-npm-webpack",
    "react-js-yarn-vite",
    "react-js-yarn-webpack",
    "react-ts-yarn-vite",
    "react-ts-yarn-webpack",
];

const BACKEND_TEMPLATES: &[&str] = &[
    "Django_postgresql",
    "Django_mysql",
    "Django_sqlite3",
    "Node.js_postgresql",
    "Node.js_mysql",
];

const SYNONYMS: &[(&str, &str)] = &[
    ("javascript", "js"),
    ("typescript", "ts"),
    ("nodejs", "node.js"),
];

/// Ordered starter-template catalog.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    frontend: Vec<String>,
    backend: Vec<String>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self {
            frontend: FRONTEND_TEMPLATES.iter().map(|s| s.to_string()).collect(),
            backend: BACKEND_TEMPLATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TemplateCatalog {
    /// A catalog with explicit entries, mostly for tests.
    pub fn new(frontend: Vec<String>, backend: Vec<String>) -> Self {
        Self { frontend, backend }
    }

    fn entries(&self, side: ProjectSide) -> &[String] {
        match side {
            ProjectSide::Frontend => &self.frontend,
            ProjectSide::Backend => &self.backend,
        }
    }

    /// Resolve a tag set to a template identifier.
    pub fn find_match(&self, side: ProjectSide, tags: &[String]) -> Result<&str, TemplateError> {
        let normalized = normalize_tags(tags);
        self.entries(side)
            .iter()
            .find(|template| {
                let template_lower = template.to_lowercase();
                normalized.iter().all(|tag| template_lower.contains(tag))
            })
            .map(|s| s.as_str())
            .ok_or_else(|| TemplateError::NotFound {
                side: side.as_str().to_string(),
                tags: tags.to_vec(),
            })
    }

    /// Resolve a tag set to the template's on-disk path, relative to the
    /// templates root: `<side>/<template>`.
    pub fn find_match_path(
        &self,
        side: ProjectSide,
        tags: &[String],
    ) -> Result<PathBuf, TemplateError> {
        let template = self.find_match(side, tags)?;
        Ok(PathBuf::from(side.dir_name()).join(template))
    }
}

/// Lower-case every tag and apply the synonym table.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| {
            let lower = tag.to_lowercase();
            SYNONYMS
                .iter()
                .find(|(from, _)| *from == lower)
                .map(|(_, to)| to.to_string())
                .unwrap_or(lower)
        })
        .collect()
}
