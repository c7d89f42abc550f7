//! Product card bot
//!
//! Users paste marketplace links and get the product card back. The
//! `popular` / `top_brand` / `top_category` reports are posted to the marketing
//! group and can only be requested by the scheduler or an operator.

use relaycore::{Predicate, Route};

use super::RouteDeps;
use crate::handlers::{Forward, Privileged, Reply};

pub const WB_LINK: &str = r"wildberries\.ru/(catalog/(\d*)|product\?card=(\d*))";
pub const OZON_LINK: &str = r"ozon\.ru/(t/[^\s]*)/?";

pub const START_TEXT: &str =
    "<b>Привет!</b> Это бот для получения картинки товара вайлдберрис. И озона. Наверное.";

/// Either marketplace link, anywhere in the text.
pub fn product_link_pattern() -> String {
    format!("({}|{})", WB_LINK, OZON_LINK)
}

pub fn routes(deps: &RouteDeps) -> Result<Vec<Route>, regex::Error> {
    let links = product_link_pattern();
    let forward = |action: &str| Forward::new(deps.backend.clone(), action);

    Ok(vec![
        Route::new(
            "links",
            Predicate::Any(vec![Predicate::text(&links)?, Predicate::caption(&links)?]),
            forward("parse_links"),
        ),
        Route::new("last", Predicate::command("last"), forward("last_products")),
        Route::new(
            "start",
            Predicate::command("start"),
            Reply::new(deps.responder.clone(), START_TEXT),
        ),
        Route::new("search", Predicate::command_with_args("search"), forward("search")),
        Route::new("popular", Predicate::command("popular"), Privileged::new(forward("popular"))),
        Route::new(
            "top_brand",
            Predicate::command("top_brand"),
            Privileged::new(forward("top_brand")),
        ),
        Route::new(
            "top_category",
            Predicate::command("top_category"),
            Privileged::new(forward("top_category")),
        ),
    ])
}
