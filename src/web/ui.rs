use axum::response::Html;

/// Single-page UI; scripts and styles live under `/assets`
pub async fn index_page() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}
