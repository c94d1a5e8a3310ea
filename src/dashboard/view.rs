use once_cell::sync::Lazy;
use serde::Serialize;
use tera::{Context, Tera};

use super::{Dashboard, EmptyState};
use crate::error::AppError;

const DASHBOARD_TEMPLATE_NAME: &str = "dashboard.txt";

const DASHBOARD_TEMPLATE: &str = r#"Smart Bookmarks{% if email %}  <{{ email }}>{% endif %}
============================================================
My Bookmarks  ({{ count_label }})
{% if search_query %}Search: "{{ search_query }}"
{% endif %}------------------------------------------------------------
{% if loading %}  Loading...
{% elif empty %}  {{ empty.title }}
  {{ empty.hint }}
{% if empty.action %}  > {{ empty.action }}: bookmarks add --title <title> --url <url>
{% endif %}{% else %}{% for b in bookmarks %}  {{ b.title }}
    {{ b.url }}
    Added {{ b.added }}   [{{ b.id }}]
{% endfor %}{% endif %}"#;

static TEMPLATES: Lazy<Result<Tera, String>> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_template(DASHBOARD_TEMPLATE_NAME, DASHBOARD_TEMPLATE)
        .map_err(|e| e.to_string())?;
    Ok(tera)
});

#[derive(Serialize)]
struct CardView {
    id: String,
    title: String,
    url: String,
    added: String,
}

#[derive(Serialize)]
struct DashboardView<'a> {
    email: Option<&'a str>,
    count_label: String,
    search_query: &'a str,
    loading: bool,
    empty: Option<EmptyState>,
    bookmarks: Vec<CardView>,
}

/// Renders the dashboard as plain terminal text.
pub fn render(dashboard: &Dashboard) -> Result<String, AppError> {
    let tera = Lazy::force(&TEMPLATES)
        .as_ref()
        .map_err(|e| AppError::Render(format!("Template failed to compile: {e}")))?;

    let view = DashboardView {
        email: dashboard.user().email.as_deref(),
        count_label: dashboard.count_label(),
        search_query: dashboard.search_query(),
        loading: dashboard.is_loading(),
        empty: dashboard.empty_state(),
        bookmarks: dashboard
            .filtered_bookmarks()
            .into_iter()
            .map(|b| CardView {
                id: b.id.to_string(),
                title: b.title.clone(),
                url: b.url.clone(),
                added: b.created_at.format("%Y-%m-%d").to_string(),
            })
            .collect(),
    };

    let context = Context::from_serialize(&view).map_err(|e| AppError::Render(e.to_string()))?;
    tera.render(DASHBOARD_TEMPLATE_NAME, &context)
        .map_err(|e| AppError::Render(e.to_string()))
}
