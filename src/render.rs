//! Rendering of a cycle result for terminals and the HTML form.
//!
//! Sections: Answer, SQL Query & Results, Review Info (only when a review ran).

use crate::agent::AgentResponse;
use crate::executor::{display_value, RowSet};

/// Widest a table column is allowed to get in terminal output
const MAX_COLUMN_WIDTH: usize = 40;

pub fn render_text(response: &AgentResponse, debug: bool) -> String {
    let mut out = String::new();

    out.push_str("=== Answer ===\n");
    out.push_str(&response.display_answer());
    out.push('\n');

    out.push_str("\n=== SQL Query & Results ===\n");
    match &response.sql {
        Some(sql) => {
            out.push_str(sql.as_str());
            out.push('\n');
        }
        None => out.push_str("(no SQL was generated)\n"),
    }
    if let Some(rows) = &response.rows {
        out.push('\n');
        out.push_str(&render_table(rows));
    }
    if let Some(failure) = &response.failure {
        if let Some(db_error) = &failure.database_error {
            out.push_str(&format!("\nDatabase error: {}\n", db_error));
        }
    }

    if let Some(review) = &response.review {
        out.push_str("\n=== Review Info ===\n");
        out.push_str(&format!("Original query:\n{}\n", review.original_sql));
        out.push_str(&format!("\nOriginal error: {}\n", review.original_error));
        out.push_str(&format!("\nReview: {}\n", review.narrative));
        out.push_str(&format!("\nCorrected query:\n{}\n", review.corrected_sql));
    }

    if debug {
        out.push_str("\n=== Debug ===\n");
        out.push_str(&format!("Cycle: {}\n", response.cycle_id));
        out.push_str(&format!("Executions: {}\n", response.executions));
        if let Some(err) = &response.composition_error {
            out.push_str(&format!("Composition error: {}\n", err));
        }
        let elapsed = response.finished_at - response.started_at;
        out.push_str(&format!("Elapsed: {} ms\n", elapsed.num_milliseconds()));
    }

    out
}

/// Plain-text grid, one line per row, with a row count footer.
pub fn render_table(rows: &RowSet) -> String {
    if rows.is_empty() {
        return "(0 rows)\n".to_string();
    }

    let cells: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|record| {
            rows.columns
                .iter()
                .map(|c| clip(&record.get(c).map(display_value).unwrap_or_default()))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = rows
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&format_line(&rows.columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&format_line(row));
        out.push('\n');
    }
    out.push_str(&format!(
        "({} row{})\n",
        rows.len(),
        if rows.len() == 1 { "" } else { "s" }
    ));
    out
}

fn clip(text: &str) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= MAX_COLUMN_WIDTH {
        text
    } else {
        let cut: String = text.chars().take(MAX_COLUMN_WIDTH - 3).collect();
        format!("{}...", cut)
    }
}

pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>SQL Agent</title>
<style>
body { font-family: sans-serif; max-width: 960px; margin: 2em auto; }
textarea { width: 100%; }
pre { background: #f4f4f4; padding: 0.5em; overflow-x: auto; }
table { border-collapse: collapse; }
td, th { border: 1px solid #ccc; padding: 0.25em 0.5em; }
.error { color: #a00; }
</style>
</head>
<body>
<h1>Ask your database</h1>
"#;

const PAGE_TAIL: &str = "</body>\n</html>\n";

fn question_form(question: &str) -> String {
    format!(
        "<form method=\"post\" action=\"/ask\">\n\
         <textarea name=\"question\" rows=\"3\" placeholder=\"e.g. How many employees are there?\">{}</textarea>\n\
         <p><button type=\"submit\">Ask</button></p>\n\
         </form>\n",
        html_escape(question)
    )
}

pub fn render_form_page() -> String {
    format!("{}{}{}", PAGE_HEAD, question_form(""), PAGE_TAIL)
}

pub fn render_error_page(message: &str) -> String {
    format!(
        "{}{}<p class=\"error\">{}</p>\n{}",
        PAGE_HEAD,
        question_form(""),
        html_escape(message),
        PAGE_TAIL
    )
}

pub fn render_html(response: &AgentResponse) -> String {
    let mut body = String::new();
    body.push_str(&question_form(&response.question));

    body.push_str("<h2>Answer</h2>\n");
    let class = if response.is_success() { "" } else { " class=\"error\"" };
    body.push_str(&format!(
        "<p{}>{}</p>\n",
        class,
        html_escape(&response.display_answer())
    ));

    body.push_str("<h2>SQL Query &amp; Results</h2>\n");
    if let Some(sql) = &response.sql {
        body.push_str(&format!("<pre>{}</pre>\n", html_escape(sql.as_str())));
    }
    if let Some(rows) = &response.rows {
        body.push_str(&html_table(rows));
    }
    if let Some(db_error) = response.failure.as_ref().and_then(|f| f.database_error.as_ref()) {
        body.push_str(&format!(
            "<p class=\"error\">Database error: {}</p>\n",
            html_escape(db_error)
        ));
    }

    if let Some(review) = &response.review {
        body.push_str("<h2>Review Info</h2>\n");
        body.push_str(&format!(
            "<h3>Original query</h3>\n<pre>{}</pre>\n<p class=\"error\">{}</p>\n\
             <h3>Review</h3>\n<p>{}</p>\n\
             <h3>Corrected query</h3>\n<pre>{}</pre>\n",
            html_escape(review.original_sql.as_str()),
            html_escape(&review.original_error),
            html_escape(&review.narrative),
            html_escape(review.corrected_sql.as_str())
        ));
    }

    format!("{}{}{}", PAGE_HEAD, body, PAGE_TAIL)
}

fn html_table(rows: &RowSet) -> String {
    if rows.is_empty() {
        return "<p>(0 rows)</p>\n".to_string();
    }
    let mut out = String::from("<table>\n<tr>");
    for column in &rows.columns {
        out.push_str(&format!("<th>{}</th>", html_escape(column)));
    }
    out.push_str("</tr>\n");
    for record in &rows.rows {
        out.push_str("<tr>");
        for column in &rows.columns {
            let text = record.get(column).map(display_value).unwrap_or_default();
            out.push_str(&format!("<td>{}</td>", html_escape(&text)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    out.push_str(&format!("<p>{} row(s)</p>\n", rows.len()));
    out
}
