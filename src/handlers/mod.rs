mod auth;
mod health;
mod metrics;
mod pages;
mod posts;

pub use auth::{credentials_handler, session_handler, signout_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use pages::{dashboard_handler, login_page_handler};
pub use posts::{
    create_post_handler, delete_post_handler, get_post_handler, list_admin_posts_handler,
    list_posts_handler,
};
