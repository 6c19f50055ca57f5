#![allow(dead_code)]

use checkout_api::{
    config::AppConfig,
    db::run_migrations,
    dto::cart::CartItemRequest,
    entity::{
        cart::{Column as CartCol, Entity as Cart},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::ActiveModel as ProductActive,
        users::ActiveModel as UserActive,
    },
    middleware::auth::AuthUser,
    services::cart_service,
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

pub fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        database_url: database_url.to_string(),
        database_max_connections: 5,
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        jwt_ttl_hours: 1,
        default_payment_method: "cash_on_delivery".into(),
    }
}

/// Connected state, or `None` when no database is configured for tests.
pub async fn db_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run database tests.");
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    run_migrations(&pool).await?;
    Ok(Some(AppState::new(pool, test_config(&database_url))))
}

/// State over a pool that never connects; for paths that must not touch storage.
pub fn offline_state() -> AppState {
    let url = "postgres://nobody@127.0.0.1:1/unused";
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(url)
        .expect("lazy pool");
    AppState::new(pool, test_config(url))
}

pub async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@example.test", Uuid::new_v4())),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}

pub async fn create_product(state: &AppState, price: Decimal) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Widget {}", Uuid::new_v4())),
        description: Set(None),
        price: Set(price),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

pub async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> anyhow::Result<i32> {
    let resp = cart_service::add_to_cart(
        state,
        user,
        CartItemRequest {
            product_id,
            quantity,
        },
    )
    .await?;
    Ok(resp.data.expect("cart quantity").quantity)
}

pub async fn order_count(state: &AppState, user: &AuthUser) -> anyhow::Result<u64> {
    Ok(Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .count(&state.orm)
        .await?)
}

pub async fn order_line_count(state: &AppState, product_id: Uuid) -> anyhow::Result<u64> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::ProductId.eq(product_id))
        .count(&state.orm)
        .await?)
}

pub async fn cart_count(state: &AppState, user: &AuthUser) -> anyhow::Result<u64> {
    Ok(Cart::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .count(&state.orm)
        .await?)
}

pub fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Installs a `BEFORE {event}` row trigger on `table` that runs `body` for rows
/// matching `condition`. Returns the trigger name for [`drop_trigger`].
pub async fn install_trigger(
    state: &AppState,
    table: &str,
    event: &str,
    condition: &str,
    body: &str,
) -> anyhow::Result<String> {
    let name = format!("t_{}", Uuid::new_v4().simple());
    let sql = format!(
        r#"
        CREATE SEQUENCE {name}_calls;
        CREATE FUNCTION {name}() RETURNS trigger LANGUAGE plpgsql AS $$
        BEGIN
            {body}
        END;
        $$;
        CREATE TRIGGER {name} BEFORE {event} ON {table}
            FOR EACH ROW WHEN ({condition}) EXECUTE FUNCTION {name}();
        "#
    );
    sqlx::raw_sql(&sql).execute(&state.pool).await?;
    Ok(name)
}

pub async fn drop_trigger(state: &AppState, table: &str, name: &str) -> anyhow::Result<()> {
    let sql = format!(
        "DROP TRIGGER IF EXISTS {name} ON {table}; \
         DROP FUNCTION IF EXISTS {name}(); \
         DROP SEQUENCE IF EXISTS {name}_calls;"
    );
    sqlx::raw_sql(&sql).execute(&state.pool).await?;
    Ok(())
}

/// Makes the first `skips` delete attempts on `product_id`'s cart rows silently
/// keep the row; `None` keeps it for good.
pub async fn keep_cart_rows(
    state: &AppState,
    product_id: Uuid,
    skips: Option<u32>,
) -> anyhow::Result<String> {
    let condition = format!("OLD.product_id = '{product_id}'");
    let body = match skips {
        Some(skips) => format!(
            "IF nextval((TG_NAME || '_calls')::regclass) <= {skips} THEN RETURN NULL; END IF; RETURN OLD;"
        ),
        None => "RETURN NULL;".to_string(),
    };
    install_trigger(state, "cart", "DELETE", &condition, &body).await
}
