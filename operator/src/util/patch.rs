use super::MANAGER_NAME;
use ambient_code_types::{AgenticSession, AgenticSessionStatus, Condition};
use kube::{
    Api, Client,
    api::{Patch, PatchParams, Resource},
};

/// Accumulates status mutations produced during one reconciliation pass so
/// they can be committed with a single status-subresource write (I5).
///
/// `SetField`/`DeleteField` in spec.md §4.1 are both modeled here as queued
/// mutator closures over [`AgenticSessionStatus`] — a later closure that
/// sets a field supersedes an earlier one that cleared it (and vice versa),
/// giving the same last-write-wins semantics the spec describes for the
/// Fields/Deletions pair without needing a stringly-typed key space for a
/// status struct that is otherwise fully typed.
pub struct StatusPatch {
    mutations: Vec<Box<dyn FnOnce(&mut AgenticSessionStatus) + Send>>,
    conditions: Vec<Condition>,
}

impl Default for StatusPatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPatch {
    pub fn new() -> Self {
        StatusPatch {
            mutations: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Queues a mutation against the status struct. Used for both setting
    /// and clearing fields (clearing is just `|s| s.field = None`).
    pub fn set_field<F>(&mut self, f: F)
    where
        F: FnOnce(&mut AgenticSessionStatus) + Send + 'static,
    {
        self.mutations.push(Box::new(f));
    }

    pub fn delete_field<F>(&mut self, f: F)
    where
        F: FnOnce(&mut AgenticSessionStatus) + Send + 'static,
    {
        self.set_field(f);
    }

    pub fn upsert_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn has_changes(&self) -> bool {
        !self.mutations.is_empty() || !self.conditions.is_empty()
    }

    /// Applies the accumulated mutations. A no-op if there are no changes.
    /// Re-reads the live CR first and swallows NotFound (the session was
    /// deleted concurrently) rather than treating it as an error — see
    /// spec.md §4.1 and §7.
    pub async fn apply(&mut self, client: Client, instance: &AgenticSession) -> Result<(), super::Error> {
        if !self.has_changes() {
            return Ok(());
        }
        let name = instance.meta().name.as_deref().unwrap();
        let namespace = instance.meta().namespace.as_deref().unwrap();
        let api: Api<AgenticSession> = Api::namespaced(client, namespace);
        let current = match api.get(name).await {
            Ok(current) => current,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut modified = current.clone();
        let mut status = modified.status.take().unwrap_or_default();
        for mutation in self.mutations.drain(..) {
            mutation(&mut status);
        }
        for condition in self.conditions.drain(..) {
            let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
            super::conditions::upsert(&mut status.conditions, condition, now);
        }
        modified.status = Some(status);

        let patch = Patch::Json::<AgenticSession>(json_patch::diff(
            &serde_json::to_value(&current).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        ));
        api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
            .await?;
        Ok(())
    }

    /// Applies the patch and resets it so the same value can be reused
    /// across stages of one reconciliation (spec.md §4.1 `ApplyAndReset`).
    /// `apply` already drains `mutations`/`conditions`, so this only exists
    /// to make that reuse intent explicit at call sites.
    pub async fn apply_and_reset(
        &mut self,
        client: Client,
        instance: &AgenticSession,
    ) -> Result<(), super::Error> {
        self.apply(client, instance).await
    }
}
