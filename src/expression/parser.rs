use super::{ExprReader, ExpressionTree, FunctionKind};
use crate::{Result, SplicerError};

/// Parses one expression. Metric queries found in it are appended to
/// `metric_queries` in the order they appear; the tree refers to them by
/// index, so several expressions can share one list.
pub fn parse_expression(expr: &str, metric_queries: &mut Vec<String>) -> Result<ExpressionTree> {
    let mut reader = ExprReader::new(expr);
    let tree = parse_call(&mut reader, metric_queries)?;

    reader.skip_whitespaces();
    if !reader.is_eof() {
        return Err(SplicerError::validation(format!(
            "Unexpected trailing input at pos={} in expr={}",
            reader.mark(),
            expr
        )));
    }
    Ok(tree)
}

fn parse_call(reader: &mut ExprReader, metric_queries: &mut Vec<String>) -> Result<ExpressionTree> {
    reader.skip_whitespaces();
    let name = reader.read_func_name();
    let function: FunctionKind = name.parse()?;
    let mut tree = ExpressionTree::new(function);

    reader.skip_whitespaces();
    if reader.next() != Some('(') {
        return Err(SplicerError::validation(format!(
            "Missing '(' after function '{}'",
            name
        )));
    }

    reader.skip_whitespaces();
    match reader.peek() {
        None => return Err(missing_close(&name)),
        Some(')') => {}
        Some(_) => {
            let param = reader.read_next_parameter();
            parse_param(&param, metric_queries, &mut tree)?;
        }
    }

    loop {
        reader.skip_whitespaces();
        if reader.is_next_char(')') {
            reader.next();
            return Ok(tree);
        } else if reader.is_next_seq(",,") {
            reader.skip(2);
            reader.skip_whitespaces();
            let param = reader.read_next_parameter();
            parse_param(&param, metric_queries, &mut tree)?;
        } else if reader.is_eof() {
            return Err(missing_close(&name));
        } else {
            return Err(SplicerError::validation(format!(
                "Invalid delimiter in parameter list of '{}' at pos={}",
                name,
                reader.mark()
            )));
        }
    }
}

fn missing_close(name: &str) -> SplicerError {
    SplicerError::validation(format!("Missing ')' for function '{}'", name))
}

fn parse_param(
    param: &str,
    metric_queries: &mut Vec<String>,
    tree: &mut ExpressionTree,
) -> Result<()> {
    if param.is_empty() {
        return Err(SplicerError::validation("Invalid parameter in expression"));
    }

    let open = param.find('(');
    if matches!(open, Some(i) if i > 0) && param.contains(')') {
        let sub_tree = parse_expression(param, metric_queries)?;
        tree.add_sub_expression(sub_tree);
    } else if has_colon_outside_braces(param) {
        metric_queries.push(param.to_string());
        tree.add_sub_metric_query(metric_queries.len() - 1);
    } else {
        tree.add_function_parameter(param.to_string());
    }
    Ok(())
}

fn has_colon_outside_braces(param: &str) -> bool {
    let mut depth = 0i32;
    for c in param.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ':' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Child;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_metric() {
        let mut queries = Vec::new();
        let tree = parse_expression("id(sum:sys.cpu{host=*})", &mut queries).unwrap();
        assert_eq!(tree.function, FunctionKind::Id);
        assert_eq!(tree.children, vec![Child::Query(0)]);
        assert_eq!(queries, vec!["sum:sys.cpu{host=*}".to_string()]);
    }

    #[test]
    fn test_nested_with_literals() {
        let mut queries = Vec::new();
        let tree = parse_expression(
            "sumSeries( scale(sum:a,,10) ,,  sum:b,, 'x')",
            &mut queries,
        )
        .unwrap();

        assert_eq!(tree.function, FunctionKind::Sum);
        assert_eq!(tree.params, vec!["'x'".to_string()]);
        assert_eq!(queries, vec!["sum:a".to_string(), "sum:b".to_string()]);

        match &tree.children[0] {
            Child::Tree(inner) => {
                assert_eq!(inner.function, FunctionKind::Scale);
                assert_eq!(inner.children, vec![Child::Query(0)]);
                assert_eq!(inner.params, vec!["10".to_string()]);
            }
            other => panic!("expected sub tree, got {:?}", other),
        }
        assert_eq!(tree.children[1], Child::Query(1));
    }

    #[test]
    fn test_shared_metric_list_across_expressions() {
        let mut queries = Vec::new();
        parse_expression("id(sum:a)", &mut queries).unwrap();
        let second = parse_expression("id(sum:a)", &mut queries).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(second.children, vec![Child::Query(1)]);
    }

    #[test]
    fn test_colon_inside_braces_is_literal() {
        let mut queries = Vec::new();
        let tree = parse_expression("alias(sum:m,,{a:b})", &mut queries).unwrap();
        assert_eq!(tree.params, vec!["{a:b}".to_string()]);
    }

    #[test]
    fn test_errors() {
        let mut queries = Vec::new();
        assert!(parse_expression("nope(sum:m)", &mut queries).is_err());
        assert!(parse_expression("sum", &mut queries).is_err());
        assert!(parse_expression("sum(sum:m", &mut queries).is_err());
        assert!(parse_expression("sum(", &mut queries).is_err());
        assert!(parse_expression("sum(sum:m,x)", &mut queries).is_err());
        assert!(parse_expression("sum(sum:m,,)", &mut queries).is_err());
        assert!(parse_expression("sum(sum:m) extra", &mut queries).is_err());
    }
}
