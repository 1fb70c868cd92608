#![allow(dead_code)]

use std::sync::{Arc, Once};

use rust_decimal::Decimal;
use tempfile::TempDir;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use servicing_backend::{
    config::AppConfig,
    db::{
        self,
        models::{Resource, ServiceMetric, ServiceSchedule},
    },
    servicing::catalog::{NewMetric, NewReading, NewResource, NewSchedule},
    AppState,
};
use servicing_backend::servicing::actor::Actor;

static INIT: Once = Once::new();

/// Initialize tracing once for integration tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .init();
    });
}

/// A fresh database in a temp dir. The dir lives as long as the harness.
pub struct Harness {
    _dir: TempDir,
    pub state: Arc<AppState>,
}

pub async fn harness() -> Harness {
    init_tracing();
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite:{}", dir.path().join("servicing.db").display());
    let config = AppConfig {
        database_url: url.clone(),
        ..AppConfig::default()
    };
    let pool = db::init_pool(&url, config.max_connections)
        .await
        .expect("init pool");
    Harness {
        _dir: dir,
        state: Arc::new(AppState::new(pool, config)),
    }
}

/// Unrestricted scope, used to set up reference data.
pub fn admin() -> Actor {
    Actor::manager("admin")
}

pub struct Press {
    pub resource: Resource,
    pub metric: ServiceMetric,
    pub schedule: ServiceSchedule,
}

pub async fn resource(state: &AppState, reference: &str, team: Option<&str>) -> Resource {
    state
        .catalog
        .create_resource(
            &admin(),
            NewResource {
                resource_type: "Press".into(),
                reference: reference.into(),
                team_id: team.map(str::to_string),
            },
        )
        .await
        .expect("create resource")
}

pub async fn metric(state: &AppState, name: &str, is_cumulative: bool) -> ServiceMetric {
    state
        .catalog
        .create_metric(
            &admin(),
            NewMetric {
                name: name.into(),
                description: String::new(),
                is_cumulative,
            },
        )
        .await
        .expect("create metric")
}

pub async fn schedule(state: &AppState, metric: &ServiceMetric, threshold: &str) -> ServiceSchedule {
    state
        .catalog
        .create_schedule(
            &admin(),
            NewSchedule {
                name: format!("{} every {}", metric.name, threshold),
                metric_id: metric.id.clone(),
                threshold: threshold.into(),
            },
        )
        .await
        .expect("create schedule")
}

/// One resource with one assigned schedule on a fresh metric.
pub async fn press(state: &AppState, reference: &str, team: Option<&str>, is_cumulative: bool, threshold: &str) -> Press {
    let resource = resource(state, reference, team).await;
    let metric = metric(state, &format!("{reference} hours"), is_cumulative).await;
    let schedule = schedule(state, &metric, threshold).await;
    state
        .catalog
        .assign_schedule(&admin(), &resource.id, &schedule.id)
        .await
        .expect("assign schedule");
    Press {
        resource,
        metric,
        schedule,
    }
}

pub async fn read(state: &AppState, press: &Press, value: &str) {
    state
        .catalog
        .record_reading(
            &Actor::viewer("operator"),
            &press.resource.id,
            NewReading {
                metric_id: press.metric.id.clone(),
                value: value.into(),
                recorded_at: None,
            },
        )
        .await
        .expect("record reading");
}

pub fn dec(raw: &str) -> Decimal {
    raw.parse().expect("decimal literal")
}
