use crate::util::{Error, SECRET_COPY_TIMEOUT};
use ambient_code_types::AgenticSession;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{ObjectMeta, OwnerReference, Patch, PatchParams, PostParams},
};

pub const COPIED_FROM_ANNOTATION: &str = "ambient-code.io/copied-from";

fn owner_reference(instance: &AgenticSession, controller: bool) -> OwnerReference {
    let mut owner = instance.controller_owner_ref(&()).unwrap();
    owner.controller = Some(controller);
    owner
}

/// Copies the secret `name` from `source_namespace` into `target_session`'s
/// namespace, per spec.md §4.3. Idempotent and safe to call every
/// reconciliation: a secret this CR already owns is left untouched except
/// for its data, and a secret owned by something else gets a second,
/// non-controller owner reference rather than being stolen.
pub async fn copy_shared_secret(
    client: Client,
    source_namespace: &str,
    name: &str,
    target_session: &AgenticSession,
) -> Result<(), Error> {
    match tokio::time::timeout(
        SECRET_COPY_TIMEOUT,
        copy_shared_secret_inner(client, source_namespace, name, target_session),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::UserInput(format!(
            "copying secret {source_namespace}/{name} timed out after {SECRET_COPY_TIMEOUT:?}"
        ))),
    }
}

async fn copy_shared_secret_inner(
    client: Client,
    source_namespace: &str,
    name: &str,
    target_session: &AgenticSession,
) -> Result<(), Error> {
    let target_namespace = target_session.meta().namespace.as_deref().unwrap();
    let source_api: Api<Secret> = Api::namespaced(client.clone(), source_namespace);
    let source = source_api.get(name).await?;
    let target_api: Api<Secret> = Api::namespaced(client.clone(), target_namespace);

    for _attempt in 0..3 {
        match target_api.get(name).await {
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(target_namespace.to_string()),
                        owner_references: Some(vec![owner_reference(target_session, true)]),
                        annotations: Some(std::collections::BTreeMap::from([(
                            COPIED_FROM_ANNOTATION.to_string(),
                            format!("{source_namespace}/{name}"),
                        )])),
                        ..Default::default()
                    },
                    data: source.data.clone(),
                    type_: source.type_.clone(),
                    ..Default::default()
                };
                match target_api.create(&PostParams::default(), &secret).await {
                    Ok(_) => return Ok(()),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(existing) => {
                let already_owned = existing
                    .metadata
                    .owner_references
                    .as_ref()
                    .is_some_and(|owners| owners.iter().any(|o| o.uid == target_session.uid().unwrap_or_default()));
                if already_owned {
                    return Ok(());
                }
                let mut updated = existing.clone();
                let has_controller = updated
                    .metadata
                    .owner_references
                    .as_ref()
                    .is_some_and(|owners| owners.iter().any(|o| o.controller == Some(true)));
                updated
                    .metadata
                    .owner_references
                    .get_or_insert_with(Vec::new)
                    .push(owner_reference(target_session, !has_controller));
                updated
                    .metadata
                    .annotations
                    .get_or_insert_with(std::collections::BTreeMap::new)
                    .insert(
                        COPIED_FROM_ANNOTATION.to_string(),
                        format!("{source_namespace}/{name}"),
                    );
                updated.data = source.data.clone();
                let patch = json_patch::diff(
                    &serde_json::to_value(&existing).unwrap(),
                    &serde_json::to_value(&updated).unwrap(),
                );
                match target_api
                    .patch(
                        name,
                        &PatchParams::apply(crate::util::MANAGER_NAME),
                        &Patch::Json::<Secret>(patch),
                    )
                    .await
                {
                    Ok(_) => return Ok(()),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::UserInput(format!(
        "exhausted retries copying secret {source_namespace}/{name} into {target_namespace}"
    )))
}

/// Deletes `name` from `target_namespace` iff it carries
/// [`COPIED_FROM_ANNOTATION`] — secrets that predate the operator, or that
/// were never a copy, are left alone (spec.md §4.3).
pub async fn delete_shared_secret(
    client: Client,
    target_namespace: &str,
    name: &str,
) -> Result<(), Error> {
    match tokio::time::timeout(
        SECRET_COPY_TIMEOUT,
        delete_shared_secret_inner(client, target_namespace, name),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::UserInput(format!(
            "deleting secret {target_namespace}/{name} timed out after {SECRET_COPY_TIMEOUT:?}"
        ))),
    }
}

async fn delete_shared_secret_inner(client: Client, target_namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(client, target_namespace);
    let secret = match api.get(name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let is_copy = secret
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(COPIED_FROM_ANNOTATION));
    if !is_copy {
        return Ok(());
    }
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
