use active_events::{
    lambda, ActiveEventArgs, ApplicationContext, Expression, Loader, Module, Node, NodePath,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn wide_tree(width: usize, depth: usize) -> Node {
    let mut root = Node::new("root");
    if depth > 0 {
        for i in 0..width {
            let mut child = wide_tree(width, depth - 1);
            child.name = format!("n{}", i % 3);
            child.value = (i as i64).into();
            root.add(child);
        }
    }
    root
}

fn bench_expressions(c: &mut Criterion) {
    let tree = wide_tree(8, 4);
    c.bench_function("expression parse", |b| {
        b.iter(|| Expression::parse(black_box(r#"/**/"/^n[01]$/"/=:int:3/.?path"#)))
    });
    let flatten = Expression::parse("/**?count").unwrap();
    c.bench_function("flatten count", |b| {
        b.iter(|| flatten.count(black_box(&tree), &NodePath::root()))
    });
    let values = Expression::parse("/*/n1/*/n2?value").unwrap();
    c.bench_function("named values", |b| {
        b.iter(|| values.evaluate(black_box(&tree), &NodePath::root()))
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let mut loader = Loader::default();
    loader.load(lambda::module()).unwrap();
    loader
        .load(
            Module::builder("bench")
                .event("bench.touch", |_: &ApplicationContext, args: &mut ActiveEventArgs<'_>| {
                    args.args_mut()?.value = true.into();
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    let ctx = loader.create_context().unwrap();

    c.bench_function("raise unknown", |b| {
        let mut args = Node::new("args");
        b.iter(|| ctx.raise(black_box("bench.nothing"), &mut args))
    });
    let program = Node::new("eval").with_children((0..32).map(|_| Node::new("bench.touch")));
    c.bench_function("eval 32 statements", |b| {
        b.iter(|| {
            let mut tree = program.clone();
            ctx.raise("eval", &mut tree)
        })
    });
}

criterion_group!(benches, bench_expressions, bench_dispatch);
criterion_main!(benches);
