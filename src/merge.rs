//! Template merge engine.
//!
//! Takes the matched starter templates and the generated design artifacts
//! and assembles a project workspace: copied template trees, emitted data
//! model / endpoint / route sources, patched project config, swagger
//! envelope, artifact dumps, and the deployment manifest.
//!
//! All of this runs with the workspace lock held by the caller; the merge
//! itself is plain synchronous filesystem work.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::catalog::{ProjectSide, TemplateCatalog, normalize_tags};
use crate::compose::{ComposePlan, render_compose};
use crate::document::DesignDocument;
use crate::schema::emit::{empty_swagger, render_models, render_swagger, render_urls, render_views};
use crate::schema::parser::parse_erd;
use crate::workspace::ProjectWorkspace;

/// What the merge produced, fed into provisioning and publishing.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub frontend_template: Option<String>,
    pub backend_template: Option<String>,
}

pub struct MergeEngine {
    templates_root: std::path::PathBuf,
    catalog: TemplateCatalog,
}

impl MergeEngine {
    pub fn new(templates_root: &Path, catalog: TemplateCatalog) -> Self {
        Self {
            templates_root: templates_root.to_path_buf(),
            catalog,
        }
    }

    /// Merge matched templates and generated artifacts into `workspace`.
    ///
    /// Sides with no tag set are skipped entirely. Re-merging overwrites:
    /// each populated side subtree is removed before the fresh copy.
    pub fn merge(
        &self,
        workspace: &ProjectWorkspace,
        document: &DesignDocument,
        frontend_tags: Option<&[String]>,
        backend_tags: Option<&[String]>,
    ) -> Result<MergeOutcome> {
        workspace.create()?;

        let frontend_template = match frontend_tags {
            Some(tags) => {
                let relative = self.catalog.find_match_path(ProjectSide::Frontend, tags)?;
                let template = relative
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                copy_template_tree(
                    &self.templates_root.join(&relative),
                    &workspace.frontend_dir(),
                )?;
                info!(workspace = workspace.name(), template, "merged frontend template");
                Some(template)
            }
            None => None,
        };

        let backend_template = match backend_tags {
            Some(tags) => {
                let relative = self.catalog.find_match_path(ProjectSide::Backend, tags)?;
                let template = relative
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                copy_template_tree(
                    &self.templates_root.join(&relative),
                    &workspace.backend_dir(),
                )?;
                if template.starts_with("Django") {
                    emit_backend_sources(&workspace.backend_dir(), document)?;
                }
                info!(workspace = workspace.name(), template, "merged backend template");
                Some(template)
            }
            None => None,
        };

        write_workspace_files(workspace, document)?;

        let postgres = backend_tags
            .map(|tags| normalize_tags(tags).iter().any(|t| t == "postgresql"))
            .unwrap_or(false);
        let plan = ComposePlan {
            frontend: frontend_template.is_some(),
            backend: backend_template.is_some(),
            postgres,
        };
        std::fs::write(workspace.compose_file(), render_compose(&plan))
            .context("Failed to write deployment manifest")?;

        Ok(MergeOutcome {
            frontend_template,
            backend_template,
        })
    }
}

/// Copy a template tree into `dest`, replacing whatever was there.
fn copy_template_tree(source: &Path, dest: &Path) -> Result<()> {
    if !source.is_dir() {
        anyhow::bail!("Template directory {} does not exist", source.display());
    }
    if dest.exists() {
        std::fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to clear {}", dest.display()))?;
    }
    std::fs::create_dir_all(dest)?;

    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is under source");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    debug!(from = %source.display(), to = %dest.display(), "copied template tree");
    Ok(())
}

/// Emit generated sources into the Django backend and patch project config.
fn emit_backend_sources(backend_dir: &Path, document: &DesignDocument) -> Result<()> {
    let app_dir = backend_dir.join("app");
    std::fs::create_dir_all(&app_dir)?;

    let schema = parse_erd(&document.erd_code);
    std::fs::write(app_dir.join("models.py"), render_models(&schema))
        .context("Failed to write models.py")?;

    let views = render_views(&document.api_code).context("Failed to render endpoint views")?;
    std::fs::write(app_dir.join("views.py"), &views).context("Failed to write views.py")?;
    std::fs::write(app_dir.join("urls.py"), render_urls(&views))
        .context("Failed to write urls.py")?;

    patch_settings(&backend_dir.join("config").join("settings.py"))?;
    patch_project_urls(&backend_dir.join("config").join("urls.py"))?;
    Ok(())
}

/// Register the generated app in `INSTALLED_APPS`. Skips when already there.
fn patch_settings(settings_path: &Path) -> Result<()> {
    if !settings_path.exists() {
        debug!(path = %settings_path.display(), "no settings.py to patch");
        return Ok(());
    }
    let content = std::fs::read_to_string(settings_path)
        .with_context(|| format!("Failed to read {}", settings_path.display()))?;
    if content.contains("'app'") || content.contains("\"app\"") {
        return Ok(());
    }
    let Some(marker) = content.find("INSTALLED_APPS = [") else {
        debug!(path = %settings_path.display(), "no INSTALLED_APPS list found");
        return Ok(());
    };
    let insert_at = marker + "INSTALLED_APPS = [".len();
    let mut patched = content.clone();
    patched.insert_str(insert_at, "\n    'app',");
    std::fs::write(settings_path, patched)
        .with_context(|| format!("Failed to write {}", settings_path.display()))?;
    Ok(())
}

/// Include the generated app routes in the project urls. Skips when already
/// there; ensures `include` is imported.
fn patch_project_urls(urls_path: &Path) -> Result<()> {
    if !urls_path.exists() {
        debug!(path = %urls_path.display(), "no project urls.py to patch");
        return Ok(());
    }
    let content = std::fs::read_to_string(urls_path)
        .with_context(|| format!("Failed to read {}", urls_path.display()))?;
    if content.contains("include('app.urls')") {
        return Ok(());
    }

    let mut patched = content;
    if !patched.contains("include") {
        patched = patched.replacen(
            "from django.urls import path",
            "from django.urls import path, include",
            1,
        );
    }
    let Some(marker) = patched.find("urlpatterns = [") else {
        debug!(path = %urls_path.display(), "no urlpatterns list found");
        return Ok(());
    };
    let insert_at = marker + "urlpatterns = [".len();
    patched.insert_str(insert_at, "\n    path('api/', include('app.urls')),");
    std::fs::write(urls_path, patched)
        .with_context(|| format!("Failed to write {}", urls_path.display()))?;
    Ok(())
}

/// Write the swagger envelope and the design artifact dumps at the
/// workspace root. An unusable API artifact still gets an envelope, with
/// an empty path map.
fn write_workspace_files(workspace: &ProjectWorkspace, document: &DesignDocument) -> Result<()> {
    let swagger = match render_swagger(&document.api_code) {
        Ok(swagger) => swagger,
        Err(error) => {
            debug!(%error, "unusable API artifact, writing empty swagger envelope");
            empty_swagger()
        }
    };
    std::fs::write(workspace.swagger_file(), swagger).context("Failed to write swagger.json")?;
    std::fs::write(workspace.artifact_dump("erd"), &document.erd_code)?;
    std::fs::write(workspace.artifact_dump("api"), &document.api_code)?;
    std::fs::write(workspace.artifact_dump("diagram"), &document.diagram_code)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TemplateError;
    use std::fs;
    use std::path::PathBuf;

    fn write_file(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// A minimal on-disk catalog with one frontend and one Django template.
    fn fixture_templates(root: &Path) {
        write_file(
            &root.join("Frontend/react-js-npm-vite/package.json"),
            "{\"name\": \"starter\"}",
        );
        write_file(
            &root.join("Frontend/react-js-npm-vite/src/main.jsx"),
            "// entry",
        );
        write_file(
            &root.join("Backend/Django_postgresql/manage.py"),
            "# manage",
        );
        write_file(
            &root.join("Backend/Django_postgresql/config/settings.py"),
            "INSTALLED_APPS = [\n    'django.contrib.admin',\n]\n",
        );
        write_file(
            &root.join("Backend/Django_postgresql/config/urls.py"),
            "from django.urls import path\n\nurlpatterns = [\n    path('admin/', None),\n]\n",
        );
    }

    fn document() -> DesignDocument {
        let mut doc = DesignDocument::new(1, "Board", "a board", None, "alice");
        doc.erd_code = "User { name string }\nPost { user_id string\n title string }".to_string();
        doc.api_code = r#"{"paths": {"/users": {"get": {"responses": {"200": {"schema": {"ok": true}}}}}}}"#
            .to_string();
        doc.diagram_code = "sequenceDiagram".to_string();
        doc
    }

    fn engine(templates_root: &Path) -> MergeEngine {
        MergeEngine::new(templates_root, TemplateCatalog::default())
    }

    #[test]
    fn merge_copies_both_sides_and_emits_sources() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");

        let outcome = engine(&templates)
            .merge(
                &workspace,
                &document(),
                Some(&["react".to_string(), "js".to_string()]),
                Some(&["django".to_string(), "postgresql".to_string()]),
            )
            .unwrap();

        assert_eq!(outcome.frontend_template.as_deref(), Some("react-js-npm-vite"));
        assert_eq!(outcome.backend_template.as_deref(), Some("Django_postgresql"));
        assert!(workspace.frontend_dir().join("src/main.jsx").is_file());
        assert!(workspace.backend_dir().join("manage.py").is_file());

        let models = fs::read_to_string(workspace.backend_dir().join("app/models.py")).unwrap();
        assert!(models.contains("class User(models.Model):"));
        assert!(models.contains("user = models.ForeignKey(User, on_delete=models.CASCADE)"));

        let views = fs::read_to_string(workspace.backend_dir().join("app/views.py")).unwrap();
        assert!(views.contains("class Users(APIView):"));

        let urls = fs::read_to_string(workspace.backend_dir().join("app/urls.py")).unwrap();
        assert!(urls.contains("views.Users.as_view()"));
    }

    #[test]
    fn merge_patches_settings_and_project_urls_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");
        let engine = engine(&templates);
        let backend_tags = vec!["django".to_string(), "postgresql".to_string()];

        engine
            .merge(&workspace, &document(), None, Some(&backend_tags))
            .unwrap();
        engine
            .merge(&workspace, &document(), None, Some(&backend_tags))
            .unwrap();

        let settings =
            fs::read_to_string(workspace.backend_dir().join("config/settings.py")).unwrap();
        assert_eq!(settings.matches("'app',").count(), 1);

        let urls = fs::read_to_string(workspace.backend_dir().join("config/urls.py")).unwrap();
        assert_eq!(urls.matches("include('app.urls')").count(), 1);
        assert!(urls.contains("from django.urls import path, include"));
    }

    #[test]
    fn merge_writes_manifest_swagger_and_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");

        engine(&templates)
            .merge(
                &workspace,
                &document(),
                Some(&["react".to_string()]),
                Some(&["django".to_string(), "postgresql".to_string()]),
            )
            .unwrap();

        let compose: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(workspace.compose_file()).unwrap()).unwrap();
        assert!(compose["services"]["frontend"].is_mapping());
        assert!(compose["services"]["backend"].is_mapping());
        assert!(compose["services"]["db"].is_mapping());

        let swagger: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(workspace.swagger_file()).unwrap()).unwrap();
        assert_eq!(swagger["swagger"], "2.0");

        assert_eq!(
            fs::read_to_string(workspace.artifact_dump("diagram")).unwrap(),
            "sequenceDiagram"
        );
        assert!(workspace.artifact_dump("erd").is_file());
        assert!(workspace.artifact_dump("api").is_file());
    }

    #[test]
    fn frontend_only_merge_without_api_still_writes_swagger_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");

        let mut doc = document();
        doc.api_code = String::new();
        engine(&templates)
            .merge(&workspace, &doc, Some(&["react".to_string()]), None)
            .unwrap();

        let swagger: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(workspace.swagger_file()).unwrap()).unwrap();
        assert_eq!(swagger["swagger"], "2.0");
        assert!(swagger["paths"].as_object().unwrap().is_empty());
    }

    #[test]
    fn skipped_side_is_untouched_and_absent_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");

        let outcome = engine(&templates)
            .merge(&workspace, &document(), Some(&["react".to_string()]), None)
            .unwrap();

        assert!(outcome.backend_template.is_none());
        assert!(!workspace.backend_dir().exists());
        let compose: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(workspace.compose_file()).unwrap()).unwrap();
        assert!(compose["services"].get("backend").is_none());
        assert!(compose["services"].get("db").is_none());
    }

    #[test]
    fn remerge_overwrites_previous_side_tree() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");
        let engine = engine(&templates);
        let tags = vec!["react".to_string()];

        engine
            .merge(&workspace, &document(), Some(&tags), None)
            .unwrap();
        let stale = workspace.frontend_dir().join("stale.txt");
        fs::write(&stale, "left over").unwrap();
        engine
            .merge(&workspace, &document(), Some(&tags), None)
            .unwrap();

        assert!(!stale.exists());
        assert!(workspace.frontend_dir().join("package.json").is_file());
    }

    #[test]
    fn unmatched_tags_surface_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fixture_templates(&templates);
        let workspace = ProjectWorkspace::new(&dir.path().join("work"), "demo");

        let err = engine(&templates)
            .merge(&workspace, &document(), Some(&["vue".to_string()]), None)
            .unwrap_err();
        assert!(err.downcast_ref::<TemplateError>().is_some());
    }

    #[test]
    fn match_path_is_relative_to_templates_root() {
        let relative = TemplateCatalog::default()
            .find_match_path(ProjectSide::Frontend, &["react".to_string()])
            .unwrap();
        assert_eq!(relative, PathBuf::from("Frontend/react-js-npm-vite"));
    }
}
