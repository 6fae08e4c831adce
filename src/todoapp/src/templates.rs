//! Embedded HTML templates. The binary is self-contained: templates are
//! compiled in and registered with Tera at startup.

use serde::Serialize;
use tera::{Context, Tera};

use crate::error::Result;
use crate::model::TodoItem;

pub const LIST_TEMPLATE: &str = "todos.html";

const TODOS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Todo List</title>
  <style>
    body { font-family: sans-serif; max-width: 40rem; margin: 2rem auto; }
    li.completed span { text-decoration: line-through; color: #888; }
    form.inline { display: inline; }
    p.error { color: #b00; }
  </style>
</head>
<body>
  <h1>Todo List</h1>
  {% if error %}<p class="error">{{ error }}</p>{% endif %}
  <form action="/todos" method="post">
    <input type="text" name="text" placeholder="What needs doing?" autofocus>
    <button type="submit">Add</button>
  </form>
  <ul>
    {% for todo in todos %}
    <li{% if todo.completed %} class="completed"{% endif %}>
      <form class="inline" action="/todos/{{ todo.id }}/toggle" method="post">
        <button type="submit">{% if todo.completed %}&#x2611;{% else %}&#x2610;{% endif %}</button>
      </form>
      <span>{{ todo.text }}</span>
      <form class="inline" action="/todos/{{ todo.id }}/delete" method="post">
        <button type="submit">&#x2715;</button>
      </form>
    </li>
    {% endfor %}
  </ul>
</body>
</html>
"#;

const ALL_TEMPLATES: &[(&str, &str)] = &[(LIST_TEMPLATE, TODOS_HTML)];

pub struct Templates {
    tera: Tera,
}

#[derive(Serialize)]
struct TodoView<'a> {
    id: String,
    text: &'a str,
    completed: bool,
}

impl Templates {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        for (name, content) in ALL_TEMPLATES {
            tera.add_raw_template(name, content)?;
        }
        tracing::debug!(
            templates = ALL_TEMPLATES.len(),
            "[Templates] Embedded templates loaded"
        );
        Ok(Self { tera })
    }

    /// Render the list page, optionally with a form error banner.
    pub fn render_list(&self, todos: &[TodoItem], error: Option<&str>) -> Result<String> {
        let views: Vec<TodoView<'_>> = todos
            .iter()
            .map(|todo| TodoView {
                id: todo.id.to_string(),
                text: &todo.text,
                completed: todo.completed,
            })
            .collect();

        let mut context = Context::new();
        context.insert("todos", &views);
        if let Some(error) = error {
            context.insert("error", error);
        }
        Ok(self.tera.render(LIST_TEMPLATE, &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_items_and_escapes_html() {
        let templates = Templates::new().unwrap();
        let mut done = TodoItem::new("ship <it>".to_string());
        done.completed = true;
        let items = vec![TodoItem::new("write tests".to_string()), done];

        let html = templates.render_list(&items, None).unwrap();
        assert!(html.contains("write tests"));
        // Tera escapes HTML in variables by default
        assert!(html.contains("ship &lt;it&gt;"));
        assert!(html.contains("class=\"completed\""));
        assert!(!html.contains("class=\"error\""));
    }

    #[test]
    fn renders_error_banner() {
        let templates = Templates::new().unwrap();
        let html = templates
            .render_list(&[], Some("Todo text must not be empty"))
            .unwrap();
        assert!(html.contains("class=\"error\""));
        assert!(html.contains("must not be empty"));
    }
}
