use axum::{
    Extension,
    extract::Query,
    response::Html,
};
use serde::Deserialize;

use crate::gate::CurrentSession;

#[derive(Deserialize, Default)]
pub struct LoginPageQuery {
    pub error: Option<String>,
}

fn login_message(error: Option<&str>) -> Option<&'static str> {
    match error? {
        "TooManyRequests" => Some("Too many login attempts. Please try again later."),
        "unauthorized" => Some("You need admin privileges to access that page."),
        "CredentialsSignin" => Some("Invalid email or password."),
        _ => Some("Sign in failed. Please try again."),
    }
}

// GET /admin/login
pub async fn login_page_handler(Query(query): Query<LoginPageQuery>) -> Html<String> {
    let notice = login_message(query.error.as_deref())
        .map(|msg| format!("<p class=\"error\">{}</p>", msg))
        .unwrap_or_default();
    Html(format!(
        "<!doctype html><html><head><title>Admin login</title></head><body>\
         <h1>Admin login</h1>{}\
         <form id=\"login\" data-action=\"/api/auth/callback/credentials\">\
         <input name=\"email\" type=\"email\"><input name=\"password\" type=\"password\">\
         <button type=\"submit\">Sign in</button></form></body></html>",
        notice
    ))
}

// GET /admin. Only reachable with a superuser session.
pub async fn dashboard_handler(
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> Html<String> {
    let name = session
        .map(|s| {
            if s.display_name.is_empty() {
                s.identity.email
            } else {
                s.display_name
            }
        })
        .unwrap_or_default();
    Html(format!(
        "<!doctype html><html><head><title>Dashboard</title></head><body>\
         <h1>Dashboard</h1><p>Signed in as {}</p></body></html>",
        escape_html(&name)
    ))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
