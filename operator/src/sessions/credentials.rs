use crate::util::{Error, TOKEN_REFRESH_TTL};
use ambient_code_types::{AgenticSession, annotations};
use k8s_openapi::api::{
    authentication::v1::{TokenRequest, TokenRequestSpec},
    core::v1::{Secret, ServiceAccount},
    rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
};
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{ObjectMeta, Patch, PatchParams, PostParams},
};
use std::collections::BTreeMap;

fn sa_name(session: &str) -> String {
    format!("ambient-session-{session}")
}

fn role_name(session: &str) -> String {
    format!("ambient-session-{session}-role")
}

fn role_binding_name(session: &str) -> String {
    format!("ambient-session-{session}-rb")
}

fn token_secret_name(session: &str) -> String {
    format!("ambient-runner-token-{session}")
}

fn owner_meta(instance: &AgenticSession, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: instance.meta().namespace.clone(),
        owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
        ..Default::default()
    }
}

/// `get`, and on not-found `create`; treats AlreadyExists from a racing
/// writer the same as a successful create (idempotency of side effects,
/// spec.md §9).
async fn create_if_missing<K>(api: &Api<K>, name: &str, object: &K) -> Result<(), Error>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + serde::Serialize,
    K::DynamicType: Default,
{
    match api.get(name).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            match api.create(&PostParams::default(), object).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Idempotently creates the service account, role, role-binding, and token
/// secret a session's runner needs, per spec.md §4.2. Returns the token
/// secret's name and records it (plus the SA name) on the CR's annotations.
pub async fn provision_runner_token(
    client: Client,
    instance: &AgenticSession,
) -> Result<String, Error> {
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let name = instance.name_any();

    let sa: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    create_if_missing(
        &sa,
        &sa_name(&name),
        &ServiceAccount {
            metadata: owner_meta(instance, sa_name(&name)),
            automount_service_account_token: Some(false),
            ..Default::default()
        },
    )
    .await?;

    // Role creation that conflicts with an existing object falls back to an
    // update so permissions stay converged with the current CRD group, per
    // spec.md §4.2.
    let desired_role = Role {
        metadata: owner_meta(instance, role_name(&name)),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["ambient-code.io".to_string()]),
                resources: Some(vec!["agenticsessions".to_string()]),
                verbs: vec![
                    "get".to_string(),
                    "list".to_string(),
                    "watch".to_string(),
                    "update".to_string(),
                    "patch".to_string(),
                ],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["authentication.k8s.io".to_string()]),
                resources: Some(vec!["selfsubjectaccessreviews".to_string()]),
                verbs: vec!["create".to_string()],
                ..Default::default()
            },
        ]),
    };
    let roles: Api<Role> = Api::namespaced(client.clone(), namespace);
    match roles
        .create(&PostParams::default(), &desired_role)
        .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            roles
                .patch(
                    &role_name(&name),
                    &PatchParams::apply(crate::util::MANAGER_NAME).force(),
                    &Patch::Apply(&desired_role),
                )
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    create_if_missing(
        &role_bindings,
        &role_binding_name(&name),
        &RoleBinding {
            metadata: owner_meta(instance, role_binding_name(&name)),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: role_name(&name),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: sa_name(&name),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
        },
    )
    .await?;

    let token = mint_token(client.clone(), namespace, &sa_name(&name)).await?;
    let secret_name = token_secret_name(&name);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let mut string_data = BTreeMap::new();
    string_data.insert("k8s-token".to_string(), token);
    let secret = Secret {
        metadata: ObjectMeta {
            annotations: Some(BTreeMap::from([(
                annotations::TOKEN_REFRESHED_AT.to_string(),
                chrono::Utc::now().to_rfc3339(),
            )])),
            ..owner_meta(instance, secret_name.clone())
        },
        string_data: Some(string_data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };
    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            secrets
                .patch(
                    &secret_name,
                    &PatchParams::apply(crate::util::MANAGER_NAME).force(),
                    &Patch::Apply(&secret),
                )
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(secret_name)
}

/// Mints a short-lived token for `sa_name` via the `ServiceAccount/token`
/// subresource.
async fn mint_token(client: Client, namespace: &str, sa_name: &str) -> Result<String, Error> {
    let api: Api<ServiceAccount> = Api::namespaced(client, namespace);
    let request = TokenRequest {
        spec: TokenRequestSpec {
            expiration_seconds: Some(TOKEN_REFRESH_TTL.as_secs() as i64 * 2),
            ..Default::default()
        },
        ..Default::default()
    };
    let data = serde_json::to_vec(&request)?;
    let response: TokenRequest = api
        .create_subresource("token", sa_name, &PostParams::default(), data)
        .await?;
    response
        .status
        .map(|s| s.token)
        .ok_or_else(|| Error::UserInput(format!("token request for {sa_name} returned no status")))
}

/// Refreshes the runner's token if `token-refreshed-at` is older than
/// [`TOKEN_REFRESH_TTL`]; otherwise a no-op. Called both by the credential
/// provisioner's callers and by the pod monitor on its tick (spec.md §4.8).
pub async fn ensure_fresh_token(client: Client, instance: &AgenticSession) -> Result<(), Error> {
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let Some(secret_name) = instance
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::RUNNER_TOKEN_SECRET))
    else {
        return Ok(());
    };
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match secrets.get(secret_name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let refreshed_at = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::TOKEN_REFRESHED_AT))
        .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok());
    if let Some(refreshed_at) = refreshed_at {
        let age = chrono::Utc::now() - refreshed_at.with_timezone(&chrono::Utc);
        if age.to_std().unwrap_or_default() < TOKEN_REFRESH_TTL {
            return Ok(());
        }
    }

    let sa = instance
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::RUNNER_SA))
        .cloned()
        .unwrap_or_else(|| sa_name(&instance.name_any()));
    let token = mint_token(client.clone(), namespace, &sa).await?;

    let mut updated = secret.clone();
    updated
        .string_data
        .get_or_insert_with(BTreeMap::new)
        .insert("k8s-token".to_string(), token);
    updated
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            annotations::TOKEN_REFRESHED_AT.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
    let patch = json_patch::diff(
        &serde_json::to_value(&secret).unwrap(),
        &serde_json::to_value(&updated).unwrap(),
    );
    secrets
        .patch(
            secret_name,
            &PatchParams::apply(crate::util::MANAGER_NAME),
            &Patch::Json::<Secret>(patch),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_object_names_follow_convention() {
        assert_eq!(sa_name("sess-1"), "ambient-session-sess-1");
        assert_eq!(role_name("sess-1"), "ambient-session-sess-1-role");
        assert_eq!(role_binding_name("sess-1"), "ambient-session-sess-1-rb");
        assert_eq!(token_secret_name("sess-1"), "ambient-runner-token-sess-1");
    }
}
