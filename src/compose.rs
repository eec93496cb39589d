//! Deployment manifest emitter.
//!
//! Builds the workspace `docker-compose.yml` as typed structs serialized
//! through serde_yaml, never by string concatenation. Which services appear
//! depends on which sides the merge populated and whether a persistence
//! tag asked for a database.

use std::collections::BTreeMap;

use serde::Serialize;

/// What the manifest should contain.
#[derive(Debug, Clone, Default)]
pub struct ComposePlan {
    pub frontend: bool,
    pub backend: bool,
    /// Set when a `postgresql` tag was present on the backend side.
    pub postgres: bool,
}

#[derive(Debug, Serialize)]
struct ComposeFile {
    version: String,
    services: BTreeMap<String, Service>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, Volume>,
}

#[derive(Debug, Serialize)]
struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    depends_on: Vec<String>,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            build: None,
            image: None,
            ports: Vec::new(),
            command: None,
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Volume {}

/// Render the manifest for a plan. Returns the YAML text.
pub fn render_compose(plan: &ComposePlan) -> String {
    let mut services = BTreeMap::new();
    let mut volumes = BTreeMap::new();

    if plan.frontend {
        services.insert(
            "frontend".to_string(),
            Service {
                build: Some("./frontend".to_string()),
                ports: vec!["3000:3000".to_string()],
                ..Service::default()
            },
        );
    }

    if plan.backend {
        let mut backend = Service {
            build: Some("./backend".to_string()),
            ports: vec!["8000:8000".to_string()],
            command: Some(
                "sh -c \"python manage.py migrate && python manage.py runserver 0.0.0.0:8000\""
                    .to_string(),
            ),
            ..Service::default()
        };
        if plan.postgres {
            backend.depends_on.push("db".to_string());
        }
        services.insert("backend".to_string(), backend);
    }

    if plan.postgres {
        let mut environment = BTreeMap::new();
        environment.insert("POSTGRES_DB".to_string(), "app".to_string());
        environment.insert("POSTGRES_USER".to_string(), "postgres".to_string());
        environment.insert("POSTGRES_PASSWORD".to_string(), "postgres".to_string());
        services.insert(
            "db".to_string(),
            Service {
                image: Some("postgres:16".to_string()),
                ports: vec!["5432:5432".to_string()],
                environment,
                volumes: vec!["postgres_data:/var/lib/postgresql/data".to_string()],
                ..Service::default()
            },
        );
        volumes.insert("postgres_data".to_string(), Volume {});
    }

    let file = ComposeFile {
        version: "3.8".to_string(),
        services,
        volumes,
    };

    serde_yaml::to_string(&file).expect("compose manifest serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn frontend_only_plan() {
        let yaml = render_compose(&ComposePlan {
            frontend: true,
            ..ComposePlan::default()
        });
        let value = parse(&yaml);
        assert_eq!(value["services"]["frontend"]["build"], "./frontend");
        assert_eq!(value["services"]["frontend"]["ports"][0], "3000:3000");
        assert!(value["services"].get("backend").is_none());
        assert!(value.get("volumes").is_none());
    }

    #[test]
    fn backend_runs_migrations_before_serving() {
        let yaml = render_compose(&ComposePlan {
            backend: true,
            ..ComposePlan::default()
        });
        let value = parse(&yaml);
        let command = value["services"]["backend"]["command"].as_str().unwrap();
        let migrate = command.find("migrate").unwrap();
        let serve = command.find("runserver").unwrap();
        assert!(migrate < serve);
        assert_eq!(value["services"]["backend"]["ports"][0], "8000:8000");
    }

    #[test]
    fn postgres_adds_service_volume_and_dependency() {
        let yaml = render_compose(&ComposePlan {
            backend: true,
            postgres: true,
            ..ComposePlan::default()
        });
        let value = parse(&yaml);
        assert_eq!(value["services"]["db"]["image"], "postgres:16");
        assert_eq!(value["services"]["db"]["ports"][0], "5432:5432");
        assert_eq!(
            value["services"]["db"]["volumes"][0],
            "postgres_data:/var/lib/postgresql/data"
        );
        assert_eq!(value["services"]["backend"]["depends_on"][0], "db");
        assert!(value["volumes"]["postgres_data"].is_mapping());
    }

    #[test]
    fn full_plan_has_all_three_services() {
        let yaml = render_compose(&ComposePlan {
            frontend: true,
            backend: true,
            postgres: true,
        });
        let value = parse(&yaml);
        let services = value["services"].as_mapping().unwrap();
        assert_eq!(services.len(), 3);
        assert_eq!(value["version"], "3.8");
    }
}
