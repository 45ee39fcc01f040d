//! Authentication business logic

use crate::crypto::PasswordHasher;
use crate::domain::{LoginInput, NewUser, RegisterInput, UpdateProfileInput, User, UserChanges};
use crate::error::{codes, AppError, Result};
use crate::jwt::{TokenPair, TokenService};
use crate::repository::UserStore;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<TokenService>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            users,
            hasher,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn register(&self, input: RegisterInput) -> Result<User> {
        input.validate()?;

        let hashed_password = self.hasher.hash(&input.password)?;
        let user = self
            .users
            .create(NewUser {
                email: input.email,
                username: input.username,
                hashed_password,
                is_active: input.is_active,
                is_superuser: input.is_superuser,
            })
            .await?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Look up a user by email and check the password.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.users.find_by_email(email).await? else {
            return Ok(None);
        };
        if !self.hasher.verify(password, &user.hashed_password) {
            return Ok(None);
        }
        Ok(Some(user))
    }

    pub async fn login(&self, input: LoginInput) -> Result<TokenPair> {
        input.validate()?;

        let user = self
            .authenticate(&input.email, &input.password)
            .await?
            .ok_or_else(|| {
                warn!("Login failed: incorrect email or password");
                AppError::Unauthorized("Incorrect email or password".to_string())
            })?;
        if !user.is_active {
            return Err(AppError::business(codes::BUSINESS, "Inactive user"));
        }

        let pair = self.tokens.issue_pair(&user.id.to_string())?;
        info!(user_id = %user.id, "User logged in");
        Ok(pair)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.tokens.refresh(refresh_token, self.users.as_ref()).await
    }

    /// Resolve the principal of a verified access token.
    pub async fn current_user(&self, subject: &str) -> Result<User> {
        let credentials =
            || AppError::Unauthorized("Could not validate credentials".to_string());

        let id = Uuid::parse_str(subject).map_err(|_| credentials())?;
        self.users.find_by_id(id).await?.ok_or_else(credentials)
    }

    pub async fn update_profile(&self, user_id: Uuid, input: UpdateProfileInput) -> Result<User> {
        input.validate()?;

        let hashed_password = input
            .password
            .as_deref()
            .map(|plain| self.hasher.hash(plain))
            .transpose()?;

        let changes = UserChanges {
            email: input.email,
            username: input.username,
            hashed_password,
            is_active: input.is_active,
        };

        self.users
            .update(user_id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::JwtConfig;
    use crate::crypto::password::MockPasswordHasher;
    use crate::repository::user::MockUserStore;
    use crate::repository::{InMemoryUserStore, StoreError};

    fn tokens() -> Arc<TokenService> {
        let config = JwtConfig {
            secret: "test-secret-key-for-testing-purposes-only".to_string(),
            ..JwtConfig::default()
        };
        let clock = Arc::new(ManualClock::at_timestamp(1_700_000_000));
        Arc::new(TokenService::new(&config, clock).unwrap())
    }

    fn plain_hasher() -> MockPasswordHasher {
        let mut hasher = MockPasswordHasher::new();
        hasher
            .expect_hash()
            .returning(|plain| Ok(format!("hashed:{plain}")));
        hasher
            .expect_verify()
            .returning(|plain, digest| digest == format!("hashed:{plain}"));
        hasher
    }

    fn service_with(store: impl UserStore + 'static) -> AuthService {
        AuthService::new(Arc::new(store), Arc::new(plain_hasher()), tokens())
    }

    fn register_input(email: &str) -> RegisterInput {
        RegisterInput {
            email: email.to_string(),
            username: "johndoe".to_string(),
            password: "correct horse".to_string(),
            is_active: true,
            is_superuser: false,
        }
    }

    fn stored_user(active: bool) -> User {
        User {
            email: "user@example.com".to_string(),
            username: "johndoe".to_string(),
            hashed_password: "hashed:correct horse".to_string(),
            is_active: active,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_hashes_password() {
        let mut store = MockUserStore::new();
        store
            .expect_create()
            .withf(|u| u.hashed_password == "hashed:correct horse" && u.email == "user@example.com")
            .returning(|u| {
                Ok(User {
                    email: u.email,
                    username: u.username,
                    hashed_password: u.hashed_password,
                    ..Default::default()
                })
            });

        let user = service_with(store)
            .register(register_input("user@example.com"))
            .await
            .unwrap();
        assert_eq!(user.username, "johndoe");
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input_before_store() {
        let mut store = MockUserStore::new();
        store.expect_create().never();

        let result = service_with(store)
            .register(register_input("not-an-email"))
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let service = service_with(InMemoryUserStore::new());
        service.register(register_input("user@example.com")).await.unwrap();

        let mut again = register_input("user@example.com");
        again.username = "other".to_string();
        let result = service.register(again).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_login_success_subject_is_user_id() {
        let user = stored_user(true);
        let user_id = user.id;
        let mut store = MockUserStore::new();
        store
            .expect_find_by_email()
            .withf(|email| email == "user@example.com")
            .returning(move |_| Ok(Some(user.clone())));

        let service = service_with(store);
        let pair = service
            .login(LoginInput {
                email: "user@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        let claims = service.tokens().verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let user = stored_user(true);
        let mut store = MockUserStore::new();
        store
            .expect_find_by_email()
            .returning(move |_| Ok(Some(user.clone())));

        let result = service_with(store)
            .login(LoginInput {
                email: "user@example.com".to_string(),
                password: "wrong password".to_string(),
            })
            .await;
        match result {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, "Incorrect email or password"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_unknown_email() {
        let mut store = MockUserStore::new();
        store.expect_find_by_email().returning(|_| Ok(None));

        let result = service_with(store)
            .login(LoginInput {
                email: "ghost@example.com".to_string(),
                password: "whatever".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_login_inactive_user() {
        let user = stored_user(false);
        let mut store = MockUserStore::new();
        store
            .expect_find_by_email()
            .returning(move |_| Ok(Some(user.clone())));

        let result = service_with(store)
            .login(LoginInput {
                email: "user@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await;
        match result {
            Err(AppError::Business { code, message, .. }) => {
                assert_eq!(code, codes::BUSINESS);
                assert_eq!(message, "Inactive user");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_storage_failure_propagates() {
        let mut store = MockUserStore::new();
        store
            .expect_find_by_email()
            .returning(|_| Err(StoreError::Backend("timeout".into())));

        let result = service_with(store)
            .login(LoginInput {
                email: "user@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_current_user_rejects_non_uuid_subject() {
        let mut store = MockUserStore::new();
        store.expect_find_by_id().never();

        let result = service_with(store).current_user("not-a-uuid").await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_update_profile_rehashes_password() {
        let user = stored_user(true);
        let user_id = user.id;
        let mut store = MockUserStore::new();
        store
            .expect_update()
            .withf(move |id, changes| {
                *id == user_id
                    && changes.hashed_password.as_deref() == Some("hashed:new password")
                    && changes.email.is_none()
            })
            .returning(move |_, _| Ok(Some(user.clone())));

        let result = service_with(store)
            .update_profile(
                user_id,
                UpdateProfileInput {
                    password: Some("new password".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_update_profile_missing_user() {
        let mut store = MockUserStore::new();
        store.expect_update().returning(|_, _| Ok(None));

        let result = service_with(store)
            .update_profile(Uuid::new_v4(), UpdateProfileInput::default())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
