mod common;

use checkout_api::{
    dto::orders::{CheckoutRequest, OrderResult, UpdateOrderStatusRequest},
    entity::audit_logs::{Column as AuditCol, Entity as AuditLogs},
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::OrderListQuery,
    services::{admin_service, cart_service, order_service},
    state::AppState,
};
use common::{
    add, cart_count, create_product, create_user, db_state, drop_trigger, install_trigger,
    keep_cart_rows, money, order_count, order_line_count,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, TransactionTrait};
use uuid::Uuid;

fn checkout_request(payment_method: &str) -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: "123 Main St".into(),
        billing_address: Some(String::new()),
        payment_method: Some(payment_method.into()),
    }
}

async fn checkout(state: &AppState, user: &AuthUser) -> Result<OrderResult, AppError> {
    let resp =
        order_service::create_order_from_cart(state, Some(user), checkout_request("credit_card"))
            .await?;
    Ok(resp.data.expect("order result"))
}

#[tokio::test]
async fn checkout_creates_order_lines_and_empties_cart() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    let mug = create_product(&state, money(2500)).await?;
    add(&state, &user, tote, 2).await?;
    add(&state, &user, mug, 1).await?;

    let result = checkout(&state, &user).await?;
    assert_eq!(result.total, money(4500));
    assert_eq!(result.items_count, 2);
    assert!(result.failed_items.is_empty());
    assert!(result.order_number.starts_with("ORD-"));
    assert_eq!(cart_count(&state, &user).await?, 0);

    let detail = order_service::get_order(&state, &user, result.order_id)
        .await?
        .data
        .expect("order detail");
    assert_eq!(detail.order.status, "pending");
    assert_eq!(detail.order.shipping_address, "123 Main St");
    assert_eq!(detail.order.billing_address, "123 Main St");
    assert_eq!(detail.order.payment_method, "credit_card");
    assert_eq!(detail.order.total_amount, money(4500));

    let mut subtotals: Vec<Decimal> = detail.items.iter().map(|line| line.subtotal).collect();
    subtotals.sort();
    assert_eq!(subtotals, vec![money(2000), money(2500)]);
    let line_sum: Decimal = detail.items.iter().map(|line| line.subtotal).sum();
    assert_eq!(line_sum, detail.order.total_amount);
    assert!(detail.items.iter().all(|line| line.product_name.is_some()));

    let audited = AuditLogs::find()
        .filter(AuditCol::UserId.eq(user.user_id))
        .filter(AuditCol::Action.eq("checkout"))
        .count(&state.orm)
        .await?;
    assert_eq!(audited, 1);

    Ok(())
}

#[tokio::test]
async fn zero_priced_line_is_skipped() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    let broken = create_product(&state, Decimal::ZERO).await?;
    add(&state, &user, tote, 2).await?;
    add(&state, &user, broken, 1).await?;

    let result = checkout(&state, &user).await?;
    assert_eq!(result.total, money(2000));
    assert_eq!(result.items_count, 1);
    assert_eq!(result.failed_items.len(), 1);
    assert_eq!(result.failed_items[0].product_id, broken);
    assert_eq!(order_line_count(&state, broken).await?, 0);
    assert_eq!(cart_count(&state, &user).await?, 0);

    Ok(())
}

#[tokio::test]
async fn empty_cart_is_rejected_without_rows() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;

    let err = checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyCart), "got {err:?}");
    assert_eq!(order_count(&state, &user).await?, 0);

    Ok(())
}

#[tokio::test]
async fn zero_total_cart_is_rejected() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let free = create_product(&state, Decimal::ZERO).await?;
    add(&state, &user, free, 3).await?;

    let err = checkout(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::ZeroTotal), "got {err:?}");
    assert_eq!(order_count(&state, &user).await?, 0);
    assert_eq!(cart_count(&state, &user).await?, 1);

    Ok(())
}

#[tokio::test]
async fn blank_shipping_address_is_rejected() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    add(&state, &user, tote, 1).await?;

    let err = order_service::create_order_from_cart(
        &state,
        Some(&user),
        CheckoutRequest {
            shipping_address: "  ".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");
    assert_eq!(cart_count(&state, &user).await?, 1);

    Ok(())
}

#[tokio::test]
async fn injected_failures_roll_back_everything() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    for (table, event) in [("orders", "INSERT"), ("order_items", "INSERT"), ("cart", "DELETE")] {
        let user = create_user(&state, "user").await?;
        let tote = create_product(&state, money(1000)).await?;
        let mug = create_product(&state, money(2500)).await?;
        add(&state, &user, tote, 2).await?;
        add(&state, &user, mug, 1).await?;

        let row = if event == "DELETE" { "OLD" } else { "NEW" };
        let condition = match table {
            "order_items" => format!("{row}.product_id = '{mug}'"),
            _ => format!("{row}.user_id = '{}'", user.user_id),
        };
        let trigger =
            install_trigger(&state, table, event, &condition, "RAISE EXCEPTION 'injected failure';")
                .await?;

        let outcome = checkout(&state, &user).await;
        drop_trigger(&state, table, &trigger).await?;

        let err = outcome.unwrap_err();
        assert_eq!(err.code(), "StorageError", "{table}: got {err:?}");
        assert_eq!(order_count(&state, &user).await?, 0, "{table}: order survived");
        assert_eq!(order_line_count(&state, tote).await?, 0, "{table}: line survived");
        assert_eq!(cart_count(&state, &user).await?, 2, "{table}: cart was touched");
    }

    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_create_one_order() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    add(&state, &user, tote, 1).await?;

    let (first, second) = tokio::join!(checkout(&state, &user), checkout(&state, &user));
    let outcomes = [first, second];
    let placed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(placed, 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(AppError::EmptyCart)))
    );
    assert_eq!(order_count(&state, &user).await?, 1);

    Ok(())
}

#[tokio::test]
async fn orders_are_isolated_per_user() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let alice = create_user(&state, "user").await?;
    let bob = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    add(&state, &alice, tote, 1).await?;
    let order = checkout(&state, &alice).await?;

    let err = order_service::get_order(&state, &bob, order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let bobs = order_service::list_orders(&state, &bob, None).await?;
    assert!(bobs.data.expect("orders").items.is_empty());

    let err = order_service::update_order_status(
        &state,
        &bob,
        order.order_id,
        UpdateOrderStatusRequest {
            status: "cancelled".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}

#[tokio::test]
async fn list_orders_is_newest_first_and_limited() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;

    let mut placed = Vec::new();
    for _ in 0..3 {
        add(&state, &user, tote, 1).await?;
        placed.push(checkout(&state, &user).await?.order_id);
    }

    let resp = order_service::list_orders(&state, &user, Some(2)).await?;
    let meta = resp.meta.expect("meta");
    assert_eq!(meta.per_page, Some(2));
    assert_eq!(meta.total, Some(3));
    let listed = resp.data.expect("orders").items;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, placed[2]);
    assert!(listed[0].created_at >= listed[1].created_at);

    Ok(())
}

#[tokio::test]
async fn status_updates_follow_role_rules() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let tote = create_product(&state, money(1000)).await?;

    add(&state, &user, tote, 1).await?;
    let shipped = checkout(&state, &user).await?;
    add(&state, &user, tote, 1).await?;
    let cancelled = checkout(&state, &user).await?;

    let set = |status: &str| UpdateOrderStatusRequest {
        status: status.into(),
    };

    let err = order_service::update_order_status(&state, &admin, shipped.order_id, set("paid"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus));

    let err = order_service::update_order_status(&state, &user, shipped.order_id, set("shipped"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let updated = order_service::update_order_status(&state, &admin, shipped.order_id, set("shipped"))
        .await?
        .data
        .expect("order");
    assert_eq!(updated.status, "shipped");

    let err = order_service::update_order_status(&state, &user, shipped.order_id, set("cancelled"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let updated = order_service::update_order_status(&state, &user, cancelled.order_id, set("cancelled"))
        .await?
        .data
        .expect("order");
    assert_eq!(updated.status, "cancelled");

    Ok(())
}

#[tokio::test]
async fn all_orders_listing_is_admin_only() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let tote = create_product(&state, money(1000)).await?;
    add(&state, &user, tote, 1).await?;
    let order = checkout(&state, &user).await?;

    let err = admin_service::list_all_orders(&state, &user, OrderListQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let listed = admin_service::list_all_orders(
        &state,
        &admin,
        OrderListQuery {
            per_page: Some(100),
            status: Some("pending".into()),
            ..Default::default()
        },
    )
    .await?;
    let meta = listed.meta.clone().expect("meta");
    assert_eq!(meta.per_page, Some(100));
    let items = listed.data.expect("orders").items;
    assert!(items.iter().all(|o| o.status == "pending"));
    assert!(items.iter().any(|o| o.id == order.order_id));

    Ok(())
}

#[tokio::test]
async fn checkout_commits_when_cart_rows_survive_clear() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    let mug = create_product(&state, money(2500)).await?;
    add(&state, &user, tote, 2).await?;
    add(&state, &user, mug, 1).await?;

    let trigger = keep_cart_rows(&state, mug, None).await?;
    let outcome = checkout(&state, &user).await;
    drop_trigger(&state, "cart", &trigger).await?;

    let result = outcome?;
    assert_eq!(result.total, money(4500));
    assert_eq!(result.items_count, 2);
    assert_eq!(order_count(&state, &user).await?, 1);
    assert_eq!(order_line_count(&state, mug).await?, 1);
    assert_eq!(cart_count(&state, &user).await?, 1);

    Ok(())
}

#[tokio::test]
async fn checkout_clear_retries_surviving_rows() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    let mug = create_product(&state, money(2500)).await?;
    add(&state, &user, tote, 1).await?;
    add(&state, &user, mug, 1).await?;

    let trigger = keep_cart_rows(&state, mug, Some(1)).await?;
    let outcome = checkout(&state, &user).await;
    drop_trigger(&state, "cart", &trigger).await?;

    outcome?;
    assert_eq!(order_count(&state, &user).await?, 1);
    assert_eq!(cart_count(&state, &user).await?, 0);

    Ok(())
}

#[tokio::test]
async fn checkout_lock_leaves_products_writable() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let tote = create_product(&state, money(1000)).await?;
    add(&state, &user, tote, 1).await?;

    let txn = state.orm.begin().await?;
    let lines = cart_service::load_checkout_lines(&txn, user.user_id, true).await?;
    assert_eq!(lines.len(), 1);

    let mut other = state.pool.begin().await?;
    sqlx::query("SET LOCAL lock_timeout = '2s'")
        .execute(&mut *other)
        .await?;
    let updated = sqlx::query("UPDATE products SET price = $1 WHERE id = $2")
        .bind(money(1200))
        .bind(tote)
        .execute(&mut *other)
        .await?;
    assert_eq!(updated.rows_affected(), 1);

    let cart_locked = sqlx::query("SELECT id FROM cart WHERE product_id = $1 FOR UPDATE NOWAIT")
        .bind(tote)
        .fetch_all(&mut *other)
        .await;
    assert!(cart_locked.is_err(), "cart row should be locked");

    other.rollback().await?;
    txn.rollback().await?;

    Ok(())
}

#[tokio::test]
async fn order_lines_come_back_in_a_stable_order() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    for cents in [1000, 2500, 400, 750] {
        let product = create_product(&state, money(cents)).await?;
        add(&state, &user, product, 1).await?;
    }
    let order_id = checkout(&state, &user).await?.order_id;

    let first = order_service::get_order(&state, &user, order_id)
        .await?
        .data
        .expect("order detail")
        .items;
    let again = order_service::get_order(&state, &user, order_id)
        .await?
        .data
        .expect("order detail")
        .items;

    let ids: Vec<Uuid> = first.iter().map(|line| line.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert_eq!(ids, again.iter().map(|line| line.id).collect::<Vec<_>>());

    Ok(())
}
