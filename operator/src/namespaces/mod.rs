use crate::util::{Error, PROBE_INTERVAL, colors::FG2};
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::{
    Api, Client, ResourceExt,
    api::{ObjectMeta, Patch, PatchParams},
    runtime::{
        Controller,
        controller::Action,
        watcher::Config as WatcherConfig,
    },
};
use owo_colors::OwoColorize;
use std::{collections::BTreeMap, sync::Arc};
use tokio::time::Duration;

/// Namespaces carrying this label are managed by the operator: their
/// sessions get provisioned, and they receive the per-namespace defaults
/// below (spec.md §4.9).
pub const MANAGEMENT_LABEL: &str = "ambient-code.io/managed";

/// Name of the per-namespace defaults `ConfigMap` seeded on Added.
pub const DEFAULTS_CONFIGMAP_NAME: &str = "ambient-code-defaults";

struct ContextData {
    client: Client,
}

/// Watches namespaces carrying [`MANAGEMENT_LABEL`] and seeds per-namespace
/// defaults, per spec.md §4.9. Shares leadership with [`crate::sessions::run`]
/// implicitly: both run only on replicas that win the session controller's
/// lease, since a single `main.rs` only spawns this after acquiring it.
pub async fn run(client: Client) -> Result<(), Error> {
    println!("{}", "Starting namespace watcher...".green());
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let context = Arc::new(ContextData { client });
    let watcher_config = WatcherConfig::default().labels(MANAGEMENT_LABEL);

    Controller::new(namespaces, watcher_config)
        .run(reconcile, on_error, context)
        .for_each(|_res| async move {})
        .await;
    Ok(())
}

/// Creates [`DEFAULTS_CONFIGMAP_NAME`] with `STORAGE_MODE=shared` if it is
/// missing. Per-namespace PVCs are intentionally not created here: sessions
/// use an ephemeral workspace volume plus object-store sync instead.
async fn reconcile(instance: Arc<Namespace>, context: Arc<ContextData>) -> Result<Action, Error> {
    let name = instance.name_any();
    let configmaps: Api<ConfigMap> = Api::namespaced(context.client.clone(), &name);

    if configmaps.get(DEFAULTS_CONFIGMAP_NAME).await.is_err() {
        println!(
            "🔧 {}{}",
            name.color(FG2),
            " seeding default namespace settings".color(FG2),
        );
        let desired = ConfigMap {
            metadata: ObjectMeta {
                name: Some(DEFAULTS_CONFIGMAP_NAME.to_string()),
                namespace: Some(name.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "STORAGE_MODE".to_string(),
                "shared".to_string(),
            )])),
            ..Default::default()
        };
        let patch = serde_json::to_value(&desired).unwrap();
        configmaps
            .patch(
                DEFAULTS_CONFIGMAP_NAME,
                &PatchParams::apply(crate::util::MANAGER_NAME).force(),
                &Patch::Apply(&patch),
            )
            .await?;
    }

    Ok(Action::requeue(PROBE_INTERVAL))
}

fn on_error(instance: Arc<Namespace>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("Namespace reconciliation error: {error:?} {:?}", instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}
