#![allow(dead_code)]

use active_events::{ApplicationContext, Expression, Loader, Module, Value};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

pub fn expr(source: &str) -> Value {
    Value::Expression(Expression::parse(source).expect("valid expression"))
}

/// A context with the built-in keywords plus `modules`.
pub fn context_with(modules: Vec<Module>) -> ApplicationContext {
    let mut loader = Loader::default();
    loader
        .load(active_events::lambda::module())
        .expect("lambda module loads");
    for module in modules {
        loader.load(module).expect("test module loads");
    }
    loader.create_context().expect("context")
}
