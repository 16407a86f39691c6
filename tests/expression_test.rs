mod common;

use active_events::{
    expression::{ExpressionError, MatchType},
    Expression, Node, NodePath, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn scenario() -> Node {
    Node::new("root").with_child(Node::new("a")).with_child(
        Node::new("b")
            .with_child(Node::with_value("c", 5))
            .with_child(Node::with_value("c", 7)),
    )
}

fn evaluate(source: &str, root: &Node) -> Vec<Value> {
    Expression::parse(source)
        .unwrap()
        .evaluate(root, &NodePath::root())
        .unwrap()
        .values()
        .cloned()
        .collect()
}

fn names(source: &str, root: &Node) -> Vec<String> {
    evaluate(source, root).iter().map(|v| v.to_string()).collect()
}

fn numbered(count: usize) -> Node {
    Node::new("list").with_children((0..count).map(|i| Node::with_value(format!("n{}", i), i)))
}

#[test]
fn test_values_in_document_order() {
    assert_eq!(
        evaluate("/*/c?value", &scenario()),
        vec![Value::Integer(5), Value::Integer(7)]
    );
}

#[test]
fn test_projections() {
    let root = scenario();
    assert_eq!(names("/*?name", &root), vec!["a", "b"]);
    assert_eq!(
        evaluate("/*/c?path", &root),
        vec![
            Value::Path(NodePath::from(vec![1, 0])),
            Value::Path(NodePath::from(vec![1, 1]))
        ]
    );
    let count = Expression::parse("/**?count").unwrap();
    assert_eq!(count.match_type(), MatchType::Count);
    assert_eq!(count.count(&root, &NodePath::root()), 5);
    assert_eq!(
        count.evaluate(&root, &NodePath::root()).unwrap().single(),
        Value::Integer(5)
    );
    assert_eq!(
        evaluate("/1/0?node", &root),
        vec![Value::from(Node::with_value("c", 5))]
    );
    assert_eq!(evaluate("/*/c?value.string", &root), vec![Value::from("5"), Value::from("7")]);
}

#[test]
fn test_range_is_half_open() {
    let list = numbered(10);
    assert_eq!(names("/*/[2,5]?name", &list), vec!["n2", "n3", "n4"]);
    assert_eq!(names("/*/2-5?name", &list), vec!["n2", "n3", "n4"]);
    assert_eq!(names("/*/[8,]?name", &list), vec!["n8", "n9"]);
    for bad in ["/*/[5,2]?name", "/*/[3,3]?name", "/*/5-5?name"] {
        assert!(
            matches!(Expression::parse(bad), Err(ExpressionError::Syntax { .. })),
            "{} should not parse",
            bad
        );
    }
}

#[test]
fn test_modulo_and_siblings() {
    let list = numbered(6);
    assert_eq!(names("/*/%2?name", &list), vec!["n0", "n2", "n4"]);
    assert_eq!(names("/n2/+2?name", &list), vec!["n4"]);
    assert_eq!(names("/n2/-?name", &list), vec!["n1"]);
    assert!(names("/n0/-?name", &list).is_empty());
}

#[test]
fn test_huge_sibling_offsets_match_nothing() {
    let root = Node::new("root").with_child(Node::new("a")).with_child(Node::new("b"));
    assert!(names("/b/+9223372036854775807?name", &root).is_empty());
    assert!(names("/a/-9223372036854775807?name", &root).is_empty());
    assert!(matches!(
        Expression::parse("/b/+9223372036854775808?name"),
        Err(ExpressionError::Syntax { .. })
    ));
}

#[test]
fn test_parent_and_ancestor() {
    let root = scenario();
    let c = NodePath::from(vec![1, 1]);
    let parent = Expression::parse("/.?name").unwrap();
    let matched = parent.evaluate(&root, &c).unwrap();
    assert_eq!(matched.single(), Value::from("b"));
    let ancestor = Expression::parse("/..root?path").unwrap();
    assert_eq!(
        ancestor.evaluate(&root, &c).unwrap().single(),
        Value::Path(NodePath::root())
    );
}

#[test]
fn test_value_filters() {
    let root = scenario();
    assert_eq!(names("/*/*/=5?name", &root), vec!["c"]);
    assert_eq!(evaluate("/**/=:int:7?value", &root), vec![Value::Integer(7)]);
    assert_eq!(evaluate(r#"/**/="/^[0-9]$/"?value"#, &root), vec![Value::Integer(5), Value::Integer(7)]);
}

#[test]
fn test_name_regex_flags() {
    let root = Node::new("r")
        .with_child(Node::new("Apple"))
        .with_child(Node::new("apricot"))
        .with_child(Node::new("banana"))
        .with_child(Node::new("apricot"));
    assert_eq!(names(r#"/"/^ap/"?name"#, &root), vec!["apricot", "apricot"]);
    assert_eq!(names(r#"/"/^ap/i"?name"#, &root), vec!["Apple", "apricot", "apricot"]);
    assert_eq!(names(r#"/"/^ap/id"?name"#, &root), vec!["Apple", "apricot"]);
}

#[test]
fn test_logicals_and_groups() {
    let root = Node::new("r")
        .with_child(Node::with_value("a", 1))
        .with_child(Node::with_value("b", 2))
        .with_child(Node::with_value("a", 3));
    assert_eq!(names("/a|/b?name", &root), vec!["a", "a", "b"]);
    assert_eq!(evaluate("/*&/*/=2?value", &root), vec![Value::Integer(2)]);
    assert_eq!(evaluate("/*!/a?value", &root), vec![Value::Integer(2)]);
    assert_eq!(evaluate("/a^/*/=3?value", &root), vec![Value::Integer(1)]);
    assert_eq!(
        evaluate("/..(/a|/b)/=1?value", &root),
        vec![Value::Integer(1)]
    );
}

#[test]
fn test_reference_follows_path_values() {
    let root = Node::new("r")
        .with_child(Node::with_value("target", "here"))
        .with_child(Node::with_value("link", NodePath::from(vec![0])));
    assert_eq!(evaluate("/link/#?value", &root), vec![Value::from("here")]);
}

#[test]
fn test_escaped_and_quoted_names() {
    let root = Node::new("r")
        .with_child(Node::new("*"))
        .with_child(Node::new("a/b"))
        .with_child(Node::new("x"));
    assert_eq!(names(r"/\*?name", &root), vec!["*"]);
    assert_eq!(names(r#"/"a/b"?name"#, &root), vec!["a/b"]);
}

#[test]
fn test_syntax_errors_name_the_expression() {
    let err = Expression::parse("/*/c").unwrap_err();
    match err {
        ExpressionError::Syntax { expression, .. } => assert_eq!(expression, "/*/c"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(Expression::parse("/%0?node").is_err());
    assert!(Expression::parse("/*?value.blob").is_err());
}

#[test]
fn test_assign_names() {
    let mut root = scenario();
    let rename = Expression::parse("/*/c?name").unwrap();
    assert_eq!(rename.assign(&mut root, &NodePath::root(), Value::from("d")).unwrap(), 2);
    assert_eq!(names("/*/d?name", &root), vec!["d", "d"]);
}

fn tree_strategy() -> impl Strategy<Value = Node> {
    // root → up to 4 children → up to 4 grandchildren each
    prop::collection::vec(0usize..4, 0..4).prop_map(|shape| {
        Node::new("root").with_children(shape.into_iter().enumerate().map(|(i, grandchildren)| {
            Node::new(format!("c{}", i))
                .with_children((0..grandchildren).map(|j| Node::new(format!("g{}", j))))
        }))
    })
}

proptest! {
    #[test]
    fn flatten_yields_every_node_once_in_pre_order(root in tree_strategy()) {
        let total = root.walk().count();
        let expression = Expression::parse("/**?path").unwrap();
        let paths: Vec<Value> = expression
            .evaluate(&root, &NodePath::root())
            .unwrap()
            .values()
            .cloned()
            .collect();
        let expected: Vec<Value> = root.walk().map(|(path, _)| Value::Path(path)).collect();
        prop_assert_eq!(paths.len(), total);
        prop_assert_eq!(paths, expected);
    }
}
