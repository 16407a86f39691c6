mod common;

use std::sync::{Arc, Mutex};

use active_events::{
    condition::{Condition, ConditionError},
    ActiveEventArgs, ApplicationContext, Error, Module, Node, NodePath, Value,
};
use common::{context_with, expr};
use pretty_assertions::assert_eq;

type Hits = Arc<Mutex<Vec<String>>>;

/// `test.true` and `test.false` record their name and answer with it.
fn marking_module(hits: &Hits) -> Module {
    let hits = hits.clone();
    Module::builder("test")
        .events(
            &["test.true", "test.false"],
            move |_: &ApplicationContext, args: &mut ActiveEventArgs<'_>| {
                hits.lock().unwrap().push(args.name().to_string());
                let answer = args.name() == "test.true";
                args.args_mut()?.value = answer.into();
                Ok(())
            },
        )
        .event("test.body", |_: &ApplicationContext, args: &mut ActiveEventArgs<'_>| {
            args.args_mut()?.value = "ran".into();
            Ok(())
        })
        .build()
}

fn evaluate(ctx: &ApplicationContext, tree: &mut Node) -> bool {
    let condition = Condition::parse(tree, &NodePath::root()).unwrap();
    condition.evaluate(ctx, tree).unwrap()
}

#[test]
fn test_or_short_circuits() {
    let hits = Hits::default();
    let ctx = context_with(vec![marking_module(&hits)]);

    let mut tree = Node::with_value("if", true).with_child(Node::new("or").with_child(Node::new("test.true")));
    assert!(evaluate(&ctx, &mut tree));
    assert!(hits.lock().unwrap().is_empty());

    let mut tree = Node::with_value("if", false).with_child(Node::new("or").with_child(Node::new("test.true")));
    assert!(evaluate(&ctx, &mut tree));
    assert_eq!(*hits.lock().unwrap(), vec!["test.true"]);
}

#[test]
fn test_and_short_circuits() {
    let hits = Hits::default();
    let ctx = context_with(vec![marking_module(&hits)]);

    let mut tree = Node::new("if")
        .with_child(Node::new("test.false"))
        .with_child(Node::new("and").with_child(Node::new("test.true")));
    assert!(!evaluate(&ctx, &mut tree));
    assert_eq!(*hits.lock().unwrap(), vec!["test.false"]);
}

#[test]
fn test_event_operand_result_is_tested() {
    let hits = Hits::default();
    let ctx = context_with(vec![marking_module(&hits)]);
    assert!(evaluate(&ctx, &mut Node::new("if").with_child(Node::new("test.true"))));
    assert!(!evaluate(&ctx, &mut Node::new("if").with_child(Node::new("test.false"))));
    assert!(evaluate(
        &ctx,
        &mut Node::with_value("if", "!").with_child(Node::new("test.false"))
    ));
    // nobody handles it, so its value stays null
    assert!(!evaluate(&ctx, &mut Node::new("if").with_child(Node::new("test.unknown"))));
}

#[test]
fn test_expression_operands() {
    let ctx = context_with(Vec::new());
    let mut tree = Node::new("root")
        .with_child(Node::with_value("_name", "Thomas"))
        .with_child(Node::with_value("_age", 42))
        .with_child(
            Node::with_value("if", expr("/../_name?value"))
                .with_child(Node::with_value("=", "Thomas"))
                .with_child(
                    Node::with_value("and", expr("/../_age?value"))
                        .with_child(Node::with_value(">=", 18)),
                ),
        );
    let condition = Condition::parse(&tree, &NodePath::from(vec![2])).unwrap();
    assert!(condition.evaluate(&ctx, &mut tree).unwrap());

    tree.children[1].value = 12.into();
    assert!(!condition.evaluate(&ctx, &mut tree).unwrap());
}

#[test]
fn test_exist_rules_by_projection() {
    let ctx = context_with(Vec::new());
    let mut tree = Node::new("root")
        .with_child(Node::new("_empty"))
        .with_child(Node::with_value("_full", 1));
    let mut check = |source: &str| {
        tree.children.truncate(2);
        tree.add(Node::with_value("if", expr(source)));
        let condition = Condition::parse(&tree, &NodePath::from(vec![2])).unwrap();
        condition.evaluate(&ctx, &mut tree).unwrap()
    };
    assert!(check("/../_empty?node"));
    assert!(!check("/../_empty?value"));
    assert!(check("/../_full?value"));
    assert!(!check("/../_missing?count"));
    assert!(check("/../_empty?name"));
}

#[test]
fn test_comparing_several_matches() {
    let ctx = context_with(Vec::new());
    let mut tree = Node::new("root")
        .with_child(Node::new("_x").with_child(Node::with_value("", 1)).with_child(Node::with_value("", 2)))
        .with_child(Node::new("_y").with_child(Node::with_value("", 1)).with_child(Node::with_value("", 2)))
        .with_child(
            Node::with_value("if", expr("/../_x/*?value"))
                .with_child(Node::with_value("=", expr("/../_y/*?value"))),
        );
    let condition = Condition::parse(&tree, &NodePath::from(vec![2])).unwrap();
    assert!(condition.evaluate(&ctx, &mut tree).unwrap());

    tree.children[1].children[1].value = 3.into();
    assert!(!condition.evaluate(&ctx, &mut tree).unwrap());
}

#[test]
fn test_if_runs_body_through_lambda() {
    let hits = Hits::default();
    let ctx = context_with(vec![marking_module(&hits)]);
    let mut tree = Node::new("eval").with_child(
        Node::new("if")
            .with_child(Node::new("test.true"))
            .with_child(Node::new("test.body")),
    );
    ctx.raise("eval", &mut tree).unwrap();
    let statement = &tree.children[0];
    assert_eq!(statement.children[1].value, Value::from("ran"));

    let mut tree = Node::new("eval").with_child(Node::with_value("if", "!"));
    assert!(matches!(
        ctx.raise("eval", &mut tree),
        Err(Error::Condition(ConditionError::MissingOperand(_)))
    ));
}

#[test]
fn test_else_if_and_else_chain() {
    let hits = Hits::default();
    let ctx = context_with(vec![marking_module(&hits)]);
    let mut tree = Node::new("eval")
        .with_child(Node::new("if").with_child(Node::new("test.false")).with_child(Node::new("test.body")))
        .with_child(Node::new("else-if").with_child(Node::new("test.true")).with_child(Node::new("test.body")))
        .with_child(Node::new("else-if").with_child(Node::new("test.true")).with_child(Node::new("test.body")))
        .with_child(Node::new("else").with_child(Node::new("test.body")));
    ctx.raise("eval", &mut tree).unwrap();

    let ran: Vec<bool> = tree
        .children
        .iter()
        .map(|branch| branch.children.iter().any(|c| c.name == "test.body" && c.value == Value::from("ran")))
        .collect();
    assert_eq!(ran, vec![false, true, false, false]);
    // the second else-if is never evaluated
    assert_eq!(*hits.lock().unwrap(), vec!["test.false", "test.true"]);
}

#[test]
fn test_orphaned_else_is_rejected() {
    let ctx = context_with(Vec::new());
    for keyword in ["else", "else-if"] {
        let mut tree = Node::new("eval")
            .with_child(Node::with_value("_data", 1))
            .with_child(Node::with_value(keyword, true));
        match ctx.raise("eval", &mut tree) {
            Err(Error::Lambda { path, .. }) => assert_eq!(path, NodePath::from(vec![1])),
            other => panic!("'{}' without 'if' gave {:?}", keyword, other),
        }
    }

    let mut tree = Node::new("eval")
        .with_child(Node::with_value("while", false))
        .with_child(Node::new("else"));
    assert!(matches!(ctx.raise("eval", &mut tree), Err(Error::Lambda { .. })));
}
