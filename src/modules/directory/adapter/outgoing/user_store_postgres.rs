use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, Func, Order};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, SqlErr,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::modules::directory::application::domain::entities::{
    NewUser, PageRequest, PageResult, SortDirection, User, UserListFilter, UserSort,
    UserSortField, UserStatus,
};
use crate::modules::directory::application::ports::outgoing::user_store::{
    ListScope, SoftDeleteOutcome, UniqueField, UserStore, UserStoreError,
};

use super::sea_orm_entity::users::{
    ActiveModel as UserActiveModel, Column as UserColumn, Entity as UserEntity, Model as UserModel,
};

#[derive(Clone, Debug)]
pub struct UserStorePostgres {
    db: Arc<DatabaseConnection>,
}

impl UserStorePostgres {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn map_to_user(model: UserModel) -> Result<User, UserStoreError> {
        let status = model
            .status
            .parse::<UserStatus>()
            .map_err(|e| UserStoreError::DatabaseError(e.to_string()))?;

        Ok(User {
            id: model.id,
            username: model.username,
            email: model.email,
            external_id: model.external_id,
            password_hash: model.password_hash,
            status,
            is_verified: model.is_verified,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.map(|t| t.with_timezone(&Utc)),
            last_login_at: model.last_login_at.map(|t| t.with_timezone(&Utc)),
            deleted_at: model.deleted_at.map(|t| t.with_timezone(&Utc)),
        })
    }

    fn email_matches(email: &str) -> sea_orm::sea_query::SimpleExpr {
        Expr::expr(Func::lower(Expr::col(UserColumn::Email))).eq(email.trim().to_lowercase())
    }

    fn username_matches(username: &str) -> sea_orm::sea_query::SimpleExpr {
        Expr::expr(Func::lower(Expr::col(UserColumn::Username)))
            .eq(username.trim().to_lowercase())
    }

    async fn find_one(&self, query: Select<UserEntity>) -> Result<Option<User>, UserStoreError> {
        query
            .one(&*self.db)
            .await
            .map_err(map_db_err)?
            .map(Self::map_to_user)
            .transpose()
    }

    async fn find_model(&self, id: Uuid) -> Result<UserModel, UserStoreError> {
        UserEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(map_db_err)?
            .ok_or(UserStoreError::UserNotFound)
    }

    async fn any_live(&self, query: Select<UserEntity>) -> Result<bool, UserStoreError> {
        let count = query
            .filter(UserColumn::DeletedAt.is_null())
            .count(&*self.db)
            .await
            .map_err(map_db_err)?;

        Ok(count > 0)
    }
}

#[async_trait]
impl UserStore for UserStorePostgres {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        self.find_one(UserEntity::find_by_id(id)).await
    }

    // Deleted rows may share an email with a live one; the live row wins.
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        self.find_one(
            UserEntity::find()
                .filter(Self::email_matches(email))
                .order_by(Expr::col(UserColumn::DeletedAt).is_null(), Order::Desc)
                .order_by_desc(UserColumn::CreatedAt),
        )
        .await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        self.find_one(
            UserEntity::find()
                .filter(Self::username_matches(username))
                .order_by(Expr::col(UserColumn::DeletedAt).is_null(), Order::Desc)
                .order_by_desc(UserColumn::CreatedAt),
        )
        .await
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, UserStoreError> {
        self.find_one(
            UserEntity::find()
                .filter(UserColumn::ExternalId.eq(external_id.trim()))
                .order_by(Expr::col(UserColumn::DeletedAt).is_null(), Order::Desc)
                .order_by_desc(UserColumn::CreatedAt),
        )
        .await
    }

    async fn list(
        &self,
        scope: ListScope,
        filter: UserListFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<PageResult<User>, UserStoreError> {
        let page = page.normalized();

        let mut query = match scope {
            ListScope::All => UserEntity::find(),
            ListScope::Active => UserEntity::find().filter(UserColumn::DeletedAt.is_null()),
            ListScope::Deleted => UserEntity::find().filter(UserColumn::DeletedAt.is_not_null()),
        };

        if let Some(status) = filter.status {
            query = query.filter(UserColumn::Status.eq(status.as_str()));
        }

        if let Some(search) = filter.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = format!("%{}%", escape_like(search));
                query = query.filter(
                    Condition::any()
                        .add(Expr::col(UserColumn::Username).ilike(&pattern))
                        .add(Expr::col(UserColumn::Email).ilike(&pattern)),
                );
            }
        }

        let column = match sort.field {
            UserSortField::CreatedAt => UserColumn::CreatedAt,
            UserSortField::UpdatedAt => UserColumn::UpdatedAt,
            UserSortField::Username => UserColumn::Username,
            UserSortField::Email => UserColumn::Email,
        };
        let order = match sort.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        // Tie-break on id so pages never overlap.
        query = query.order_by(column, order).order_by_asc(UserColumn::Id);

        let total = query.clone().count(&*self.db).await.map_err(map_db_err)?;

        let models = query
            .offset(page.offset())
            .limit(u64::from(page.page_size))
            .all(&*self.db)
            .await
            .map_err(map_db_err)?;

        let items = models
            .into_iter()
            .map(Self::map_to_user)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageResult {
            items,
            page: page.page,
            page_size: page.page_size,
            total,
        })
    }

    async fn add(&self, user: NewUser) -> Result<User, UserStoreError> {
        let active_user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(user.username),
            email: Set(user.email),
            external_id: Set(user.external_id),
            password_hash: Set(user.password_hash),
            status: Set(UserStatus::Active.as_str().to_string()),
            is_verified: Set(false),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
            last_login_at: Set(None),
            deleted_at: Set(None),
        };

        let inserted = active_user.insert(&*self.db).await.map_err(map_write_err)?;
        debug!(user_id = %inserted.id, "user row inserted");

        Self::map_to_user(inserted)
    }

    async fn update(&self, user: User) -> Result<User, UserStoreError> {
        let existing = self.find_model(user.id).await?;
        if existing.deleted_at.is_some() {
            return Err(UserStoreError::UserNotFound);
        }

        let mut active_user: UserActiveModel = existing.into();
        active_user.username = Set(user.username);
        active_user.email = Set(user.email);
        active_user.external_id = Set(user.external_id);
        active_user.password_hash = Set(user.password_hash);
        active_user.status = Set(user.status.as_str().to_string());
        active_user.is_verified = Set(user.is_verified);
        active_user.updated_at = Set(Some(Utc::now().into()));

        // A delete committed after the read above must win over this write.
        let updated = UserEntity::update(active_user)
            .filter(UserColumn::DeletedAt.is_null())
            .exec(&*self.db)
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => UserStoreError::UserNotFound,
                other => map_write_err(other),
            })?;

        Self::map_to_user(updated)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<SoftDeleteOutcome, UserStoreError> {
        let existing = self.find_model(id).await?;

        if existing.deleted_at.is_some() {
            return Ok(SoftDeleteOutcome::AlreadyDeleted(Self::map_to_user(
                existing,
            )?));
        }

        let mut active_user: UserActiveModel = existing.into();
        active_user.deleted_at = Set(Some(Utc::now().into()));
        active_user.status = Set(UserStatus::Banned.as_str().to_string());

        let deleted = active_user.update(&*self.db).await.map_err(map_db_err)?;

        Ok(SoftDeleteOutcome::Deleted(Self::map_to_user(deleted)?))
    }

    async fn restore(&self, id: Uuid) -> Result<User, UserStoreError> {
        let existing = self.find_model(id).await?;

        if existing.deleted_at.is_none() {
            let user = Self::map_to_user(existing)?;
            return Err(UserStoreError::NotDeleted(user.status));
        }

        let mut active_user: UserActiveModel = existing.into();
        active_user.deleted_at = Set(None);
        active_user.status = Set(UserStatus::Active.as_str().to_string());

        // A live account may have taken the email or username meanwhile.
        let restored = active_user.update(&*self.db).await.map_err(map_write_err)?;

        Self::map_to_user(restored)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User, UserStoreError> {
        let existing = self.find_model(id).await?;
        if existing.deleted_at.is_some() {
            return Err(UserStoreError::UserNotFound);
        }

        let mut active_user: UserActiveModel = existing.into();
        active_user.last_login_at = Set(Some(at.into()));

        let updated = active_user.update(&*self.db).await.map_err(map_db_err)?;

        Self::map_to_user(updated)
    }

    async fn exists_by_id(&self, id: Uuid) -> Result<bool, UserStoreError> {
        self.any_live(UserEntity::find_by_id(id)).await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, UserStoreError> {
        self.any_live(UserEntity::find().filter(Self::email_matches(email)))
            .await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, UserStoreError> {
        self.any_live(UserEntity::find().filter(Self::username_matches(username)))
            .await
    }

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, UserStoreError> {
        self.any_live(UserEntity::find().filter(UserColumn::ExternalId.eq(external_id.trim())))
            .await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn map_db_err(e: DbErr) -> UserStoreError {
    UserStoreError::DatabaseError(e.to_string())
}

/// Maps unique-index violations to the column they protect. Index names come
/// from the migration crate.
fn map_write_err(e: DbErr) -> UserStoreError {
    let message = match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => msg,
        _ => {
            let err_str = e.to_string();
            let lowered = err_str.to_lowercase();
            if !(lowered.contains("23505")
                || lowered.contains("duplicate key")
                || lowered.contains("unique constraint"))
            {
                return UserStoreError::DatabaseError(err_str);
            }
            err_str
        }
    };

    match unique_field_from_message(&message) {
        Some(field) => UserStoreError::AlreadyExists(field),
        None => UserStoreError::DatabaseError(message),
    }
}

fn unique_field_from_message(message: &str) -> Option<UniqueField> {
    let lowered = message.to_lowercase();
    if lowered.contains("external_id") {
        Some(UniqueField::ExternalId)
    } else if lowered.contains("username") {
        Some(UniqueField::Username)
    } else if lowered.contains("email") {
        Some(UniqueField::Email)
    } else {
        None
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ============================================================================
// Tests
// ============================================================================
