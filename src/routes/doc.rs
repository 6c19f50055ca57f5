use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{CartItemRequest, CartList, CartQuantity, DeletedCount},
        orders::{CheckoutRequest, OrderList, OrderResult, OrderWithItems, UpdateOrderStatusRequest},
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    models::{CartLine, FailedItem, Order, OrderLine, OrderStatus, Product, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::readiness,
        auth::login,
        auth::register,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_cart,
        cart::delete_from_cart,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::update_order_status,
        admin::list_all_orders,
    ),
    components(
        schemas(
            User,
            Product,
            CartLine,
            Order,
            OrderLine,
            OrderStatus,
            FailedItem,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CartItemRequest,
            CartQuantity,
            DeletedCount,
            CartList,
            CheckoutRequest,
            OrderResult,
            OrderList,
            OrderWithItems,
            UpdateOrderStatusRequest,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            params::SortOrder,
            Meta,
            ApiResponse<Product>,
            ApiResponse<CartList>,
            ApiResponse<OrderResult>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Auth", description = "Registration and token issuing"),
        (name = "Products", description = "Catalog"),
        (name = "Cart", description = "Shopping cart"),
        (name = "Orders", description = "Checkout and order history"),
        (name = "Admin", description = "Privileged order visibility"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
