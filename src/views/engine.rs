//! Tera-backed [`ViewRenderer`].

use serde_json::Value;
use tera::{Context, Tera};

use crate::http::request::Cookies;
use crate::views::format::{cell, hidden_by};
use crate::views::{Component, ViewError, ViewRenderer};

const LAYOUT: &str = "layout.html";

const TEMPLATES: [(&str, &str); 5] = [
    (LAYOUT, include_str!("templates/layout.html")),
    ("query_result.html", include_str!("templates/query_result.html")),
    ("database.html", include_str!("templates/database.html")),
    ("repl.html", include_str!("templates/repl.html")),
    ("error.html", include_str!("templates/error.html")),
];

/// Templates compiled once at startup.
pub struct TeraViews {
    tera: Tera,
}

impl TeraViews {
    pub fn new() -> Result<Self, ViewError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES).map_err(ViewError::Load)?;
        tera.register_filter("cell", cell);
        tera.register_filter("hidden_by", hidden_by);
        Ok(Self { tera })
    }

    fn render_template(&self, name: &str, context: &Context) -> Result<String, ViewError> {
        self.tera
            .render(name, context)
            .map_err(|source| ViewError::Render {
                component: name.to_string(),
                source,
            })
    }
}

impl ViewRenderer for TeraViews {
    fn render(
        &self,
        component: Component,
        props: &Value,
        cookies: &Cookies,
    ) -> Result<String, ViewError> {
        let mut context = Context::new();
        context.insert("props", props);
        context.insert("cookies", cookies);
        self.render_template(component.template_name(), &context)
    }

    fn render_layout(&self, props: &Value, placeholder: &str) -> Result<String, ViewError> {
        let mut context = Context::new();
        context.insert("props", props);
        context.insert("content", placeholder);
        self.render_template(LAYOUT, &context)
    }
}
