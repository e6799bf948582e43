//! Authorization checks shared by the flows.
//!
//! Answers "may this user get a token for this app", "may this actor act as
//! users of that organization" and "may this token be used against the API".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use af_core::InstancePolicy;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::claims::ActorClaim;
use crate::client::App;
use crate::error::{OidcError, OidcResult};

/// Role allowing impersonation of any user of the instance.
pub const IAM_ADMIN_IMPERSONATOR: &str = "IAM_ADMIN_IMPERSONATOR";
/// Role allowing impersonation of users of one organization.
pub const ORG_ADMIN_IMPERSONATOR: &str = "ORG_ADMIN_IMPERSONATOR";
/// Role of a trusted login UI.
pub const IAM_LOGIN_CLIENT: &str = "IAM_LOGIN_CLIENT";

/// Where a role membership applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleScope {
    /// Whole instance.
    Instance,
    /// One organization.
    Organization(String),
}

/// A user as known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    /// User id.
    pub id: String,
    /// Organization owning the user.
    pub resource_owner: String,
    /// Whether the user may log in.
    pub active: bool,
}

/// Read access to grants and role memberships.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Returns whether the user holds a grant on the project.
    async fn has_project_grant(&self, user_id: &str, project_id: &str) -> OidcResult<bool>;

    /// Returns whether the organization owns or was granted the project.
    async fn org_has_project(&self, org_id: &str, project_id: &str) -> OidcResult<bool>;

    /// Returns whether the user holds `role` in `scope`.
    async fn has_role(&self, user_id: &str, scope: &RoleScope, role: &str) -> OidcResult<bool>;
}

/// Read access to users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up a user by id.
    async fn get_user(&self, user_id: &str) -> OidcResult<Option<DirectoryUser>>;
}

/// In-memory grant store.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    user_grants: RwLock<HashSet<(String, String)>>,
    org_projects: RwLock<HashSet<(String, String)>>,
    roles: RwLock<HashMap<String, HashSet<(RoleScope, String)>>>,
}

impl InMemoryGrantStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a user access to a project.
    pub async fn grant_project(&self, user_id: &str, project_id: &str) {
        self.user_grants
            .write()
            .await
            .insert((user_id.to_string(), project_id.to_string()));
    }

    /// Gives an organization access to a project.
    pub async fn grant_org_project(&self, org_id: &str, project_id: &str) {
        self.org_projects
            .write()
            .await
            .insert((org_id.to_string(), project_id.to_string()));
    }

    /// Adds a role membership.
    pub async fn add_role(&self, user_id: &str, scope: RoleScope, role: &str) {
        self.roles
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert((scope, role.to_string()));
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn has_project_grant(&self, user_id: &str, project_id: &str) -> OidcResult<bool> {
        Ok(self
            .user_grants
            .read()
            .await
            .contains(&(user_id.to_string(), project_id.to_string())))
    }

    async fn org_has_project(&self, org_id: &str, project_id: &str) -> OidcResult<bool> {
        Ok(self
            .org_projects
            .read()
            .await
            .contains(&(org_id.to_string(), project_id.to_string())))
    }

    async fn has_role(&self, user_id: &str, scope: &RoleScope, role: &str) -> OidcResult<bool> {
        Ok(self
            .roles
            .read()
            .await
            .get(user_id)
            .is_some_and(|roles| roles.contains(&(scope.clone(), role.to_string()))))
    }
}

/// In-memory user directory.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, DirectoryUser>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active user.
    pub async fn add_user(&self, user_id: &str, resource_owner: &str) {
        self.users.write().await.insert(
            user_id.to_string(),
            DirectoryUser {
                id: user_id.to_string(),
                resource_owner: resource_owner.to_string(),
                active: true,
            },
        );
    }

    /// Deactivates a user.
    pub async fn deactivate(&self, user_id: &str) {
        if let Some(user) = self.users.write().await.get_mut(user_id) {
            user.active = false;
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: &str) -> OidcResult<Option<DirectoryUser>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}

/// How a token is about to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiUsage {
    /// OIDC userinfo endpoint.
    UserInfo,
    /// Token introspection.
    Introspection,
    /// Any other API call.
    Api,
}

/// Permission checks over injected stores and the instance policy.
#[derive(Clone)]
pub struct PermissionChecker {
    grants: Arc<dyn GrantStore>,
    users: Arc<dyn UserDirectory>,
    policy: InstancePolicy,
}

impl std::fmt::Debug for PermissionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionChecker")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PermissionChecker {
    /// Creates a checker.
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantStore>,
        users: Arc<dyn UserDirectory>,
        policy: InstancePolicy,
    ) -> Self {
        Self {
            grants,
            users,
            policy,
        }
    }

    /// Returns the instance policy.
    #[must_use]
    pub const fn policy(&self) -> &InstancePolicy {
        &self.policy
    }

    /// Returns the user directory.
    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    /// Returns whether `actor_id` may impersonate users of `subject_org`.
    ///
    /// Requires the instance policy to allow impersonation and the actor to
    /// hold `IAM_ADMIN_IMPERSONATOR` on the instance or
    /// `ORG_ADMIN_IMPERSONATOR` on `subject_org`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the grant store fails.
    pub async fn can_impersonate(&self, actor_id: &str, subject_org: &str) -> OidcResult<bool> {
        if !self.policy.impersonation_enabled {
            return Ok(false);
        }
        if self
            .grants
            .has_role(actor_id, &RoleScope::Instance, IAM_ADMIN_IMPERSONATOR)
            .await?
        {
            return Ok(true);
        }
        self.grants
            .has_role(
                actor_id,
                &RoleScope::Organization(subject_org.to_string()),
                ORG_ADMIN_IMPERSONATOR,
            )
            .await
    }

    /// Checks that a token may be used for `usage`.
    ///
    /// Delegated tokens (carrying an actor) are limited to userinfo and
    /// introspection.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::PermissionDenied`] for delegated tokens used
    /// against the API.
    pub fn can_use_api(&self, actor: Option<&ActorClaim>, usage: ApiUsage) -> OidcResult<()> {
        match (actor, usage) {
            (None, _) | (Some(_), ApiUsage::UserInfo | ApiUsage::Introspection) => Ok(()),
            (Some(actor), ApiUsage::Api) => {
                tracing::warn!(actor = %actor.sub, "delegated token used for api call");
                Err(OidcError::PermissionDenied(
                    "Errors.TokenExchange.Token.NotForAPI".to_string(),
                ))
            }
        }
    }

    /// Returns whether `caller_id` may bind sessions to auth requests it
    /// does not own.
    ///
    /// # Errors
    ///
    /// Returns an error only if the grant store fails.
    pub async fn can_link_session(&self, caller_id: &str) -> OidcResult<bool> {
        self.grants
            .has_role(caller_id, &RoleScope::Instance, IAM_LOGIN_CLIENT)
            .await
    }

    /// Checks that `user_id` of `user_org` may obtain tokens for `app`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::PermissionDenied`] if a configured project check
    /// fails.
    pub async fn check_user_grant(&self, app: &App, user_id: &str, user_org: &str) -> OidcResult<()> {
        if app.project_role_check
            && !self.grants.has_project_grant(user_id, &app.project_id).await?
        {
            return Err(OidcError::PermissionDenied(format!(
                "user has no grant on project {}",
                app.project_id
            )));
        }
        if app.has_project_check
            && user_org != app.resource_owner
            && !self.grants.org_has_project(user_org, &app.project_id).await?
        {
            return Err(OidcError::PermissionDenied(format!(
                "organization has no access to project {}",
                app.project_id
            )));
        }
        Ok(())
    }
}
