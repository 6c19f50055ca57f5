use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    PaginatorTrait, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        CheckoutRequest, OrderList, OrderResult, OrderWithItems, UpdateOrderStatusRequest,
    },
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{FailedItem, Order, OrderLine, OrderStatus},
    response::{ApiResponse, Meta},
    services::cart_service::{self, CheckoutLine},
    state::AppState,
};

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

/// Shipping, billing and payment details after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutDetails {
    pub shipping_address: String,
    pub billing_address: String,
    pub payment_method: String,
}

impl CheckoutDetails {
    pub fn resolve(payload: CheckoutRequest, default_payment_method: &str) -> AppResult<Self> {
        let shipping_address = payload.shipping_address.trim().to_string();
        if shipping_address.is_empty() {
            return Err(AppError::BadRequest("Shipping address is required".into()));
        }

        let billing_address = non_blank(payload.billing_address)
            .unwrap_or_else(|| shipping_address.clone());
        let payment_method = non_blank(payload.payment_method)
            .unwrap_or_else(|| default_payment_method.to_string());

        Ok(Self {
            shipping_address,
            billing_address,
            payment_method,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A cart line accepted into the order, priced at checkout time.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Split cart lines into priced order lines and the lines that must be skipped.
pub fn partition_lines(lines: &[CheckoutLine]) -> (Vec<PricedLine>, Vec<FailedItem>) {
    let mut valid = Vec::with_capacity(lines.len());
    let mut failed = Vec::new();

    for line in lines {
        let reason = if line.product_id.is_nil() {
            Some("invalid product id")
        } else if line.quantity <= 0 {
            Some("quantity must be greater than 0")
        } else if line.price <= Decimal::ZERO {
            Some("unit price must be greater than 0")
        } else {
            None
        };

        match reason {
            Some(reason) => failed.push(FailedItem {
                product_id: line.product_id,
                reason: reason.to_string(),
            }),
            None => valid.push(PricedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.price,
                subtotal: cart_service::line_total(line.price, line.quantity),
            }),
        }
    }

    (valid, failed)
}

/// Sum of quantity x current price over every cart line, valid or not.
pub fn cart_total(lines: &[CheckoutLine]) -> Decimal {
    lines
        .iter()
        .map(|line| cart_service::line_total(line.price, line.quantity))
        .sum()
}

/// `ORD-<yyyymmdd>-<8 hex chars>`; the suffix comes from a random v4 UUID.
pub fn generate_order_number(now: DateTime<Utc>, nonce: Uuid) -> String {
    let suffix: String = nonce
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

pub async fn create_order_from_cart(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderResult>> {
    let user = user.ok_or(AppError::Unauthenticated)?;

    // Validation happens before any transaction is opened.
    let preview = cart_service::load_checkout_lines(&state.orm, user.user_id, false).await?;
    if preview.is_empty() {
        return Err(AppError::EmptyCart);
    }
    if cart_total(&preview) <= Decimal::ZERO {
        return Err(AppError::ZeroTotal);
    }
    let details = CheckoutDetails::resolve(payload, &state.config.default_payment_method)?;

    let txn = state.orm.begin().await?;
    tracing::debug!(user_id = %user.user_id, "checkout transaction started");

    let result = match place_order(&txn, user.user_id, &details).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(user_id = %user.user_id, error = ?err, "checkout failed, rolling back");
            if let Err(rollback_err) = txn.rollback().await {
                tracing::error!(error = %rollback_err, "checkout rollback failed");
            }
            return Err(err);
        }
    };

    txn.commit().await?;
    tracing::info!(
        user_id = %user.user_id,
        order_id = %result.order_id,
        order_number = %result.order_number,
        total = %result.total,
        items = result.items_count,
        skipped = result.failed_items.len(),
        "order committed"
    );

    audit::record(
        &state.pool,
        Some(user.user_id),
        "checkout",
        "orders",
        serde_json::json!({ "order_id": result.order_id, "order_number": result.order_number }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order placed",
        result,
        Some(Meta::empty()),
    ))
}

/// Every step of order creation. Runs inside the caller's transaction; any
/// error leaves the rollback to the caller.
async fn place_order<C>(
    conn: &C,
    user_id: Uuid,
    details: &CheckoutDetails,
) -> AppResult<OrderResult>
where
    C: ConnectionTrait,
{
    // Locked re-read: a concurrent checkout of the same cart waits here and
    // then finds it empty.
    let lines = cart_service::load_checkout_lines(conn, user_id, true).await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let (valid, failed_items) = partition_lines(&lines);
    for item in &failed_items {
        tracing::warn!(%user_id, product_id = %item.product_id, reason = %item.reason, "skipping cart line");
    }
    if valid.is_empty() {
        return Err(AppError::NoValidItems);
    }

    let total: Decimal = valid.iter().map(|line| line.subtotal).sum();
    if total <= Decimal::ZERO {
        return Err(AppError::ZeroTotal);
    }

    let order_id = Uuid::new_v4();
    let order_number = generate_order_number(Utc::now(), Uuid::new_v4());

    OrderActive {
        id: Set(order_id),
        user_id: Set(user_id),
        order_number: Set(order_number.clone()),
        total_amount: Set(total),
        status: Set(OrderStatus::Pending.to_string()),
        shipping_address: Set(details.shipping_address.clone()),
        billing_address: Set(details.billing_address.clone()),
        payment_method: Set(details.payment_method.clone()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(conn)
    .await?;
    tracing::debug!(%order_id, %order_number, %total, "order row inserted");

    for line in &valid {
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            subtotal: Set(line.subtotal),
            created_at: NotSet,
        }
        .insert(conn)
        .await?;
    }
    tracing::debug!(%order_id, lines = valid.len(), "order lines inserted");

    // The order stands even if stale cart rows survive the retry.
    let cleared = cart_service::clear_lines(conn, user_id).await?;
    if cleared.remaining > 0 {
        tracing::warn!(
            %user_id,
            %order_id,
            remaining = cleared.remaining,
            "cart not fully cleared after checkout"
        );
    }

    Ok(OrderResult {
        order_id,
        order_number,
        total,
        items_count: valid.len(),
        failed_items,
    })
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    limit: Option<i64>,
) -> AppResult<ApiResponse<OrderList>> {
    let limit = limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let orders = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .order_by_desc(OrderCol::CreatedAt)
        .order_by_desc(OrderCol::Id)
        .limit(limit as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<Vec<_>>();

    let total = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .count(&state.orm)
        .await? as i64;
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::new(1, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let Some(order) = order else {
        return Err(AppError::NotFound);
    };

    let items = load_order_lines(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    let status: OrderStatus = payload.status.parse()?;

    let txn = state.orm.begin().await?;

    let mut condition = Condition::all().add(OrderCol::Id.eq(id));
    if !user.is_admin() {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    let existing = Orders::find()
        .filter(condition)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let Some(existing) = existing else {
        return Err(AppError::NotFound);
    };

    if !user.is_admin() {
        let current: OrderStatus = existing.status.parse()?;
        if status != OrderStatus::Cancelled || current != OrderStatus::Pending {
            return Err(AppError::Forbidden);
        }
    }

    let previous = existing.status.clone();
    let mut active: OrderActive = existing.into();
    active.status = Set(status.to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": previous, "to": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub(crate) async fn load_order_lines<C>(conn: &C, order_id: Uuid) -> AppResult<Vec<OrderLine>>
where
    C: ConnectionTrait,
{
    let lines = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .order_by_asc(OrderItemCol::Id)
        .find_also_related(Products)
        .all(conn)
        .await?
        .into_iter()
        .map(|(item, product)| order_line_from_entity(item, product))
        .collect();
    Ok(lines)
}

pub(crate) fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        order_number: model.order_number,
        total_amount: model.total_amount,
        status: model.status,
        shipping_address: model.shipping_address,
        billing_address: model.billing_address,
        payment_method: model.payment_method,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_line_from_entity(model: OrderItemModel, product: Option<ProductModel>) -> OrderLine {
    OrderLine {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: product.map(|p| p.name),
        quantity: model.quantity,
        price: model.price,
        subtotal: model.subtotal,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
