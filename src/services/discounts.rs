use crate::{
    entities::{discount_rule, DiscountRule, DiscountRuleModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a discount rule cannot be applied to a cart. Checks run in a fixed
/// order and the first failure wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiscountRejection {
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    BelowMinCartValue { minimum: Decimal },
    AlreadyApplied,
}

impl fmt::Display for DiscountRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "coupon is inactive"),
            Self::NotYetValid => write!(f, "coupon is not valid yet"),
            Self::Expired => write!(f, "coupon has expired"),
            Self::UsageLimitReached => write!(f, "coupon has reached its usage limit"),
            Self::BelowMinCartValue { minimum } => {
                write!(f, "cart total is below the coupon minimum of {}", minimum)
            }
            Self::AlreadyApplied => write!(f, "a coupon is already applied to this cart"),
        }
    }
}

/// Outcome of a successful usage increment.
#[derive(Debug, Clone, Copy)]
pub struct UsageOutcome {
    /// The increment consumed the last remaining slot.
    pub exhausted: bool,
}

/// Canonical form of a coupon code: trimmed, upper-cased.
pub fn canonicalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Validates a rule against a cart, returning the first failing reason.
///
/// Check order: active flag, validity window, global usage, cart minimum,
/// not already the cart's current coupon.
pub fn evaluate_rule(
    rule: &DiscountRuleModel,
    cart_gross: Decimal,
    now: DateTime<Utc>,
    applied_code: Option<&str>,
) -> Result<(), DiscountRejection> {
    if !rule.is_active {
        return Err(DiscountRejection::Inactive);
    }
    if now < rule.valid_from {
        return Err(DiscountRejection::NotYetValid);
    }
    if now > rule.valid_until {
        return Err(DiscountRejection::Expired);
    }
    if !rule.has_remaining_uses() {
        return Err(DiscountRejection::UsageLimitReached);
    }
    if cart_gross < rule.min_cart_value {
        return Err(DiscountRejection::BelowMinCartValue {
            minimum: rule.min_cart_value,
        });
    }
    if applied_code.is_some() {
        return Err(DiscountRejection::AlreadyApplied);
    }
    Ok(())
}

/// Discount-rule store: lookup, validation and the atomic usage counter, plus
/// the administrative CRUD surface.
#[derive(Clone)]
pub struct DiscountService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl DiscountService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Case-insensitive exact lookup on the canonicalized code.
    pub async fn find_by_code(&self, code: &str) -> Result<DiscountRuleModel, ServiceError> {
        let canonical = canonicalize_code(code);
        DiscountRule::find()
            .filter(discount_rule::Column::Code.eq(canonical.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", canonical)))
    }

    /// Atomically consumes one usage slot.
    ///
    /// The increment is a single conditional UPDATE guarded by
    /// `usage_count < usage_limit`, so two confirmations racing for the last
    /// slot cannot both win. Zero affected rows means the slot was lost and the
    /// caller must roll its transaction back.
    pub async fn increment_usage<C>(
        &self,
        conn: &C,
        rule_id: Uuid,
    ) -> Result<UsageOutcome, ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = DiscountRule::update_many()
            .col_expr(
                discount_rule::Column::UsageCount,
                Expr::col(discount_rule::Column::UsageCount).add(1),
            )
            .col_expr(discount_rule::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(discount_rule::Column::Id.eq(rule_id))
            .filter(
                Expr::col(discount_rule::Column::UsageCount)
                    .lt(Expr::col(discount_rule::Column::UsageLimit)),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::UsageLimitReached(format!(
                "coupon {} has no remaining uses",
                rule_id
            )));
        }

        let rule = DiscountRule::find_by_id(rule_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", rule_id)))?;

        let exhausted = !rule.has_remaining_uses();
        if exhausted && rule.is_active {
            let mut active: discount_rule::ActiveModel = rule.into();
            active.is_active = Set(false);
            active.updated_at = Set(Utc::now());
            active.update(conn).await?;
        }

        Ok(UsageOutcome { exhausted })
    }

    /// Creates a discount rule. Codes are unique after canonicalization.
    #[instrument(skip(self))]
    pub async fn create_rule(
        &self,
        input: CreateDiscountRuleInput,
    ) -> Result<DiscountRuleModel, ServiceError> {
        let code = canonicalize_code(&input.code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }
        if input.discount_percentage < Decimal::ZERO
            || input.discount_percentage > Decimal::from(100)
        {
            return Err(ServiceError::ValidationError(
                "Discount percentage must be between 0 and 100".to_string(),
            ));
        }
        if input.max_discount_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Maximum discount cannot be negative".to_string(),
            ));
        }
        if input.valid_from >= input.valid_until {
            return Err(ServiceError::ValidationError(
                "Valid-until must be later than valid-from".to_string(),
            ));
        }
        if input.usage_limit < 1 {
            return Err(ServiceError::ValidationError(
                "Usage limit must be at least 1".to_string(),
            ));
        }

        let existing = DiscountRule::find()
            .filter(discount_rule::Column::Code.eq(code.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let rule_id = Uuid::new_v4();
        let rule = discount_rule::ActiveModel {
            id: Set(rule_id),
            code: Set(code),
            discount_percentage: Set(input.discount_percentage),
            max_discount_amount: Set(input.max_discount_amount),
            min_cart_value: Set(input.min_cart_value.unwrap_or(Decimal::ZERO)),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        let rule = rule.insert(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::DiscountRuleCreated(rule_id))
            .await;

        info!("Created coupon {}: {}", rule_id, rule.code);
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<DiscountRuleModel, ServiceError> {
        DiscountRule::find_by_id(rule_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", rule_id)))
    }

    pub async fn list_rules(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<DiscountRuleModel>, u64), ServiceError> {
        let paginator = DiscountRule::find()
            .order_by_desc(discount_rule::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let rules = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((rules, total))
    }

    /// Applies a partial update to a rule. The usage counter is not editable
    /// here; it only moves through `increment_usage`.
    #[instrument(skip(self))]
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        input: UpdateDiscountRuleInput,
    ) -> Result<DiscountRuleModel, ServiceError> {
        let rule = self.get_rule(rule_id).await?;

        if let Some(ref new_code) = input.code {
            let canonical = canonicalize_code(new_code);
            let clash = DiscountRule::find()
                .filter(discount_rule::Column::Code.eq(canonical.clone()))
                .one(&*self.db)
                .await?;
            if clash.map(|c| c.id != rule_id).unwrap_or(false) {
                return Err(ServiceError::Conflict(format!(
                    "Coupon code {} already exists",
                    canonical
                )));
            }
        }

        let valid_from = input.valid_from.unwrap_or(rule.valid_from);
        let valid_until = input.valid_until.unwrap_or(rule.valid_until);
        if valid_from >= valid_until {
            return Err(ServiceError::ValidationError(
                "Valid-until must be later than valid-from".to_string(),
            ));
        }

        let mut active: discount_rule::ActiveModel = rule.into();
        if let Some(code) = input.code {
            active.code = Set(canonicalize_code(&code));
        }
        if let Some(pct) = input.discount_percentage {
            if pct < Decimal::ZERO || pct > Decimal::from(100) {
                return Err(ServiceError::ValidationError(
                    "Discount percentage must be between 0 and 100".to_string(),
                ));
            }
            active.discount_percentage = Set(pct);
        }
        if let Some(cap) = input.max_discount_amount {
            active.max_discount_amount = Set(cap);
        }
        if let Some(min) = input.min_cart_value {
            active.min_cart_value = Set(min);
        }
        if let Some(limit) = input.usage_limit {
            if limit < 1 {
                return Err(ServiceError::ValidationError(
                    "Usage limit must be at least 1".to_string(),
                ));
            }
            active.usage_limit = Set(limit);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.valid_from = Set(valid_from);
        active.valid_until = Set(valid_until);
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<(), ServiceError> {
        let rule = self.get_rule(rule_id).await?;
        DiscountRule::delete_by_id(rule.id).exec(&*self.db).await?;
        info!("Deleted coupon {}", rule_id);
        Ok(())
    }
}

/// Input for creating a discount rule
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDiscountRuleInput {
    pub code: String,
    pub discount_percentage: Decimal,
    pub max_discount_amount: Decimal,
    pub min_cart_value: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: i32,
}

/// Input for updating a discount rule
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateDiscountRuleInput {
    pub code: Option<String>,
    pub discount_percentage: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub min_cart_value: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
}
