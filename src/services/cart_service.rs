use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, RelationTrait,
};
use sea_orm::sea_query::LockType;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{CartDeleteQuery, CartItemRequest, CartList, CartQuantity, DeletedCount},
    entity::{
        cart::{self, Column as CartCol, Entity as Cart},
        products::Column as ProdCol,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartLine,
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(FromRow)]
struct CartWithProductRow {
    product_id: Uuid,
    name: String,
    quantity: i32,
    unit_price: Decimal,
}

/// Cart line with the product price resolved at read time, as consumed by checkout.
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    pub deleted: u64,
    pub remaining: u64,
}

pub async fn list_cart(
    state: &AppState,
    user: Option<&AuthUser>,
) -> AppResult<ApiResponse<CartList>> {
    let Some(user) = user else {
        return Ok(ApiResponse::success("OK", CartList::empty(), Some(Meta::empty())));
    };

    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT c.product_id, p.name, c.quantity, p.price AS unit_price
        FROM cart c
        JOIN products p ON p.id = c.product_id
        WHERE c.user_id = $1
        ORDER BY c.created_at ASC, c.product_id ASC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let lines = rows
        .into_iter()
        .map(|row| CartLine {
            product_id: row.product_id,
            name: row.name,
            quantity: row.quantity,
            unit_price: row.unit_price,
            line_total: line_total(row.unit_price, row.quantity),
        })
        .collect();

    Ok(ApiResponse::success("OK", summarize(lines), Some(Meta::empty())))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: CartItemRequest,
) -> AppResult<ApiResponse<CartQuantity>> {
    if payload.quantity <= 0 {
        return Err(AppError::InvalidQuantity);
    }

    let product_exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(&state.pool)
        .await?;
    if product_exist.is_none() {
        return Err(AppError::NotFound);
    }

    let (quantity,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO cart (user_id, product_id, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = cart.quantity + EXCLUDED.quantity, updated_at = now()
        RETURNING quantity
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .fetch_one(&state.pool)
    .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart",
        serde_json::json!({ "product_id": payload.product_id, "added": payload.quantity, "quantity": quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to cart",
        CartQuantity { quantity },
        None,
    ))
}

pub async fn set_quantity(
    state: &AppState,
    user: &AuthUser,
    payload: CartItemRequest,
) -> AppResult<ApiResponse<CartQuantity>> {
    if payload.quantity <= 0 {
        remove_line(state, user, payload.product_id).await?;
        return Ok(ApiResponse::success(
            "Removed from cart",
            CartQuantity { quantity: 0 },
            None,
        ));
    }

    let updated: Option<(i32,)> = sqlx::query_as(
        r#"
        UPDATE cart
        SET quantity = $3, updated_at = now()
        WHERE user_id = $1 AND product_id = $2
        RETURNING quantity
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .fetch_optional(&state.pool)
    .await?;

    let Some((quantity,)) = updated else {
        return Err(AppError::NotFound);
    };

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart",
        serde_json::json!({ "product_id": payload.product_id, "quantity": quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart updated",
        CartQuantity { quantity },
        None,
    ))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<DeletedCount>> {
    let deleted_count = remove_line(state, user, product_id).await?;
    Ok(ApiResponse::success(
        "Removed from cart",
        DeletedCount { deleted_count },
        Some(Meta::empty()),
    ))
}

/// Removing an absent line is not an error.
async fn remove_line(state: &AppState, user: &AuthUser, product_id: Uuid) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM cart WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() > 0 {
        audit::record(
            &state.pool,
            Some(user.user_id),
            "cart_remove",
            "cart",
            serde_json::json!({ "product_id": product_id }),
        )
        .await;
    }

    Ok(result.rows_affected())
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<DeletedCount>> {
    let outcome = clear_lines(&state.orm, user.user_id).await?;
    if outcome.remaining > 0 {
        return Err(AppError::IncompleteClear {
            remaining: outcome.remaining,
        });
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        "cart",
        serde_json::json!({ "deleted_count": outcome.deleted }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart emptied",
        DeletedCount {
            deleted_count: outcome.deleted,
        },
        Some(Meta::empty()),
    ))
}

/// Dispatch for `DELETE /cart`: `action=empty` wins over `product_id`.
pub async fn delete_from_cart(
    state: &AppState,
    user: &AuthUser,
    query: CartDeleteQuery,
) -> AppResult<ApiResponse<DeletedCount>> {
    match (query.action.as_deref(), query.product_id) {
        (Some("empty"), _) => clear_cart(state, user).await,
        (_, Some(product_id)) => remove_from_cart(state, user, product_id).await,
        _ => Err(AppError::BadRequest(
            "product_id or action=empty is required".into(),
        )),
    }
}

/// Delete every cart line of `user_id`, re-count, and retry once if rows survived.
///
/// Generic over the connection so checkout can run it inside its transaction.
pub async fn clear_lines<C>(conn: &C, user_id: Uuid) -> AppResult<ClearOutcome>
where
    C: ConnectionTrait,
{
    let mut deleted = Cart::delete_many()
        .filter(CartCol::UserId.eq(user_id))
        .exec(conn)
        .await?
        .rows_affected;

    let mut remaining = count_lines(conn, user_id).await?;
    if remaining > 0 {
        tracing::warn!(%user_id, remaining, "cart rows remain after delete, retrying");
        deleted += Cart::delete_many()
            .filter(CartCol::UserId.eq(user_id))
            .exec(conn)
            .await?
            .rows_affected;
        remaining = count_lines(conn, user_id).await?;
    }

    Ok(ClearOutcome { deleted, remaining })
}

pub async fn count_lines<C>(conn: &C, user_id: Uuid) -> AppResult<u64>
where
    C: ConnectionTrait,
{
    let count = Cart::find()
        .filter(CartCol::UserId.eq(user_id))
        .count(conn)
        .await?;
    Ok(count)
}

/// Read the cart joined with current prices. With `lock`, the cart rows (not the
/// product rows) are held `FOR UPDATE` until the surrounding transaction ends.
pub async fn load_checkout_lines<C>(
    conn: &C,
    user_id: Uuid,
    lock: bool,
) -> AppResult<Vec<CheckoutLine>>
where
    C: ConnectionTrait,
{
    let mut select = Cart::find()
        .select_only()
        .column_as(CartCol::ProductId, "product_id")
        .column_as(CartCol::Quantity, "quantity")
        .column_as(ProdCol::Price, "price")
        .join(JoinType::InnerJoin, cart::Relation::Products.def())
        .filter(CartCol::UserId.eq(user_id))
        .order_by_asc(CartCol::CreatedAt)
        .order_by_asc(CartCol::ProductId);
    if lock {
        QueryTrait::query(&mut select).lock_with_tables(LockType::Update, [Cart]);
    }

    let lines = select.into_model::<CheckoutLine>().all(conn).await?;
    Ok(lines)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    (unit_price * Decimal::from(quantity)).round_dp(2)
}

fn summarize(items: Vec<CartLine>) -> CartList {
    let total = items.iter().map(|line| line.line_total).sum();
    let item_count = items.iter().map(|line| i64::from(line.quantity)).sum();
    CartList {
        items,
        total,
        item_count,
    }
}
