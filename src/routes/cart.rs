use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::cart::{CartDeleteQuery, CartItemRequest, CartList, CartQuantity, DeletedCount},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/",
        get(cart_list)
            .post(add_to_cart)
            .put(update_cart)
            .delete(delete_from_cart),
    )
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart lines with totals; empty for guests", body = ApiResponse<CartList>)
    ),
    tag = "Cart"
)]
pub async fn cart_list(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> AppResult<Json<ApiResponse<CartList>>> {
    let resp = cart_service::list_cart(&state, user.as_ref()).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    request_body = CartItemRequest,
    responses(
        (status = 200, description = "Add to cart, incrementing an existing line", body = ApiResponse<CartQuantity>),
        (status = 400, description = "Invalid quantity"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CartItemRequest>,
) -> AppResult<Json<ApiResponse<CartQuantity>>> {
    let resp = cart_service::add_to_cart(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/cart",
    request_body = CartItemRequest,
    responses(
        (status = 200, description = "Overwrite a line's quantity; 0 or less removes it", body = ApiResponse<CartQuantity>),
        (status = 404, description = "Cart line not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CartItemRequest>,
) -> AppResult<Json<ApiResponse<CartQuantity>>> {
    let resp = cart_service::set_quantity(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    params(CartDeleteQuery),
    responses(
        (status = 200, description = "Remove one line or empty the cart", body = ApiResponse<DeletedCount>),
        (status = 400, description = "Neither product_id nor action=empty given"),
        (status = 409, description = "Cart could not be fully cleared"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn delete_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CartDeleteQuery>,
) -> AppResult<Json<ApiResponse<DeletedCount>>> {
    let resp = cart_service::delete_from_cart(&state, &user, query).await?;
    Ok(Json(resp))
}
