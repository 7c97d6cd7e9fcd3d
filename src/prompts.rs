//! Prompt texts for generation, review and answer composition

use crate::db::Dialect;

/// Prompt asking for a single SQL statement answering `question`
pub fn generate_sql_prompt(dialect: Dialect, schema: &str, question: &str) -> String {
    format!(
        r#"You are an expert SQL query generator. Given a natural language question and a database schema, write one precise {dialect} query that answers the question.

Database Schema:
{schema}

Natural Language Question: {question}

Instructions:
1. Write exactly one SQL statement using valid {dialect} syntax
2. Use only tables and columns that appear in the schema
3. Include appropriate WHERE clauses, JOINs, GROUP BY and ORDER BY where the question needs them
4. If the question is ambiguous, make a reasonable assumption
5. Put the statement inside a ```sql fenced code block and write nothing else

SQL Query:"#,
        dialect = dialect.name(),
        schema = schema,
        question = question,
    )
}

/// Prompt asking the model to diagnose a failed statement and correct it
pub fn review_sql_prompt(
    dialect: Dialect,
    schema: &str,
    question: &str,
    failed_sql: &str,
    error: &str,
) -> String {
    format!(
        r#"You are a meticulous reviewer of SQL code. A {dialect} query written to answer a user's question failed when it was executed. Diagnose the defect and write a corrected query.

Database Schema:
{schema}

Original Question: {question}

Failed SQL Query:
```sql
{failed_sql}
```

Database Error:
{error}

Instructions:
1. Explain what caused the error, referring to the schema where relevant
2. Write a corrected {dialect} query that still answers the original question
3. Respond with a JSON object with exactly two keys: "review" (a string with your diagnosis) and "corrected_query" (a string with the corrected SQL statement)
4. Return only the JSON object, no markdown around it

Your JSON Response:"#,
        dialect = dialect.name(),
        schema = schema,
        question = question,
        failed_sql = failed_sql,
        error = error,
    )
}

/// Prompt asking for a conversational answer built from a rendered result table.
///
/// `review` is the reviewer's narrative when the statement was corrected.
pub fn compose_answer_prompt(
    question: &str,
    sql: &str,
    review: Option<&str>,
    results_summary: &str,
    empty: bool,
) -> String {
    let review_info = review
        .map(|r| format!("SQL Query Review:\n{}\n\n", r))
        .unwrap_or_default();
    let empty_rule = if empty {
        "\n6. The query matched no records. Say clearly that nothing matching the question was found, and do not invent data"
    } else {
        ""
    };

    format!(
        r#"You are a helpful assistant that explains database query results in natural language.

Original Question: {question}
SQL Query Used: {sql}

{review_info}Query Results:
{results_summary}

Instructions:
1. Provide a clear, conversational answer to the original question
2. Include specific numbers and details from the results
3. If there are many results, summarize the key findings
4. Make the response easy to understand for non-technical users
5. Don't mention SQL or technical database terms unless necessary, but you can mention the review if it's relevant to the answer{empty_rule}

Natural Language Response:"#,
        question = question,
        sql = sql,
        review_info = review_info,
        results_summary = results_summary,
        empty_rule = empty_rule,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prompt_names_dialect_and_question() {
        let prompt = generate_sql_prompt(Dialect::MySql, "Table: employees", "How many employees?");
        assert!(prompt.contains("MySQL"));
        assert!(prompt.contains("Table: employees"));
        assert!(prompt.contains("How many employees?"));
        assert!(prompt.contains("```sql"));
    }

    #[test]
    fn test_review_prompt_carries_error_verbatim() {
        let prompt = review_sql_prompt(
            Dialect::Postgres,
            "Table: sales",
            "List sales by region",
            "SELECT region FROM sales GROUP BY regoin",
            "Unknown column 'regoin'",
        );
        assert!(prompt.contains("Unknown column 'regoin'"));
        assert!(prompt.contains("GROUP BY regoin"));
        assert!(prompt.contains("\"corrected_query\""));
    }

    #[test]
    fn test_compose_prompt_adds_empty_rule_only_when_empty() {
        assert!(compose_answer_prompt("q", "SELECT 1", None, "No rows returned.", true).contains("matched no records"));
        assert!(!compose_answer_prompt("q", "SELECT 1", None, "a | b", false).contains("matched no records"));
    }

    #[test]
    fn test_answer_prompt_carries_review_only_when_present() {
        let reviewed = compose_answer_prompt(
            "Sales by region?",
            "SELECT region FROM sales",
            Some("GROUP BY referenced a misspelled column"),
            "a | b",
            false,
        );
        assert!(reviewed.contains("SQL Query Review:\nGROUP BY referenced a misspelled column"));

        let plain = compose_answer_prompt("Sales by region?", "SELECT region FROM sales", None, "a | b", false);
        assert!(!plain.contains("SQL Query Review:"));
    }
}
