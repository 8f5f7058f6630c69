use gongdb_exec::query::BoundTable;
use gongdb_exec::row::{as_sources, NullRow, ProjectedRow};
use gongdb_exec::storage::BaseRow;
use gongdb_exec::{
    BinaryOperator, Column, DataType, Error, EvalMode, Evaluated, Expr, Function, RowSource,
    TableMeta, TableRef, Value,
};

fn tables() -> Vec<BoundTable> {
    vec![
        BoundTable {
            table: TableRef::new("t"),
            meta: TableMeta::new(
                "t",
                vec![
                    Column::new("a", DataType::Integer),
                    Column::new("label", DataType::Text),
                ],
            ),
        },
        BoundTable {
            table: TableRef::aliased("other", "u"),
            meta: TableMeta::new("other", vec![Column::new("b", DataType::Integer)]),
        },
    ]
}

fn bound(mut expr: Expr) -> Expr {
    expr.validate_columns(&tables()).unwrap();
    expr
}

fn gt(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOperator::Gt, left, right)
}

fn eq(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOperator::Eq, left, right)
}

fn eval(expr: &Expr, mode: EvalMode, rows: &[&dyn RowSource]) -> Evaluated {
    expr.evaluate(mode, rows).unwrap()
}

#[test]
fn partial_and_is_decided_only_by_a_false_operand() {
    let expr = bound(Expr::binary(
        BinaryOperator::And,
        gt(Expr::column("t", "a"), Expr::value(1)),
        eq(Expr::column("u", "b"), Expr::value(2)),
    ));
    let small = [Value::Integer(0), Value::from("x")];
    let large = [Value::Integer(5), Value::from("x")];

    let row = BaseRow::new("t", 1, &small);
    assert_eq!(
        eval(&expr, EvalMode::Partial, &[&row]),
        Evaluated::Value(Value::Boolean(false))
    );
    let row = BaseRow::new("t", 2, &large);
    assert_eq!(eval(&expr, EvalMode::Partial, &[&row]), Evaluated::Unavailable);
}

#[test]
fn partial_or_is_decided_only_by_a_true_operand() {
    let expr = bound(Expr::binary(
        BinaryOperator::Or,
        eq(Expr::column("u", "b"), Expr::value(2)),
        gt(Expr::column("t", "a"), Expr::value(1)),
    ));
    let large = [Value::Integer(5), Value::Null];
    let small = [Value::Integer(0), Value::Null];

    let row = BaseRow::new("t", 1, &large);
    assert_eq!(
        eval(&expr, EvalMode::Partial, &[&row]),
        Evaluated::Value(Value::Boolean(true))
    );
    let row = BaseRow::new("t", 2, &small);
    assert_eq!(eval(&expr, EvalMode::Partial, &[&row]), Evaluated::Unavailable);
}

#[test]
fn partial_evaluation_never_prunes_a_row_full_evaluation_keeps() {
    let predicates = [
        BinaryOperator::And,
        BinaryOperator::Or,
    ]
    .map(|op| {
        bound(Expr::binary(
            op,
            gt(Expr::column("t", "a"), Expr::value(1)),
            eq(Expr::column("u", "b"), Expr::value(2)),
        ))
    });
    let a_values = [Value::Integer(0), Value::Integer(5), Value::Null];
    let b_values = [Value::Integer(1), Value::Integer(2), Value::Null];

    for predicate in &predicates {
        for a in &a_values {
            let t_values = [a.clone(), Value::Null];
            let t_row = BaseRow::new("t", 1, &t_values);
            let pruned = match eval(predicate, EvalMode::Partial, &[&t_row]) {
                Evaluated::Value(value) => !value.is_true().unwrap(),
                Evaluated::Unavailable => false,
            };
            for b in &b_values {
                let u_values = [b.clone()];
                let u_row = BaseRow::new("u", 1, &u_values);
                let full = eval(predicate, EvalMode::Full, &[&t_row, &u_row])
                    .into_value()
                    .unwrap();
                assert!(
                    !(pruned && full.is_true().unwrap()),
                    "{} pruned t.a = {} but full evaluation keeps u.b = {}",
                    predicate,
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn unavailable_is_not_null() {
    let expr = bound(Expr::binary(
        BinaryOperator::Is,
        Expr::column("u", "b"),
        Expr::value(Value::Null),
    ));
    let values = [Value::Integer(1), Value::Null];
    let row = BaseRow::new("t", 1, &values);
    assert_eq!(eval(&expr, EvalMode::Partial, &[&row]), Evaluated::Unavailable);

    let padding = NullRow::new("u");
    assert_eq!(
        eval(&expr, EvalMode::Partial, &[&row, &padding]),
        Evaluated::Value(Value::Boolean(true))
    );
}

#[test]
fn full_mode_requires_every_table() {
    let expr = bound(Expr::column("u", "b"));
    let values = [Value::Integer(1), Value::Null];
    let row = BaseRow::new("t", 1, &values);
    assert!(matches!(
        expr.evaluate(EvalMode::Full, &[&row]),
        Err(Error::ColumnNotFound(_))
    ));
}

#[test]
fn unresolved_columns_are_internal() {
    let expr = Expr::column("t", "a");
    let values = [Value::Integer(1), Value::Null];
    let row = BaseRow::new("t", 1, &values);
    assert!(expr.evaluate(EvalMode::Full, &[&row]).unwrap_err().is_internal());
}

#[test]
fn validation_resolves_qualifier_type_and_index() {
    let expr = bound(Expr::unqualified("LABEL"));
    let column = expr.column_ref().unwrap();
    assert_eq!(column.table.as_deref(), Some("t"));
    assert_eq!(column.name, "label");
    assert_eq!(column.data_type, Some(DataType::Text));
    assert_eq!(column.index, Some(1));

    let aliased = bound(Expr::unqualified("b"));
    assert_eq!(aliased.column_ref().unwrap().table.as_deref(), Some("u"));

    let mut missing = Expr::column("t", "b");
    assert!(matches!(
        missing.validate_columns(&tables()),
        Err(Error::ColumnNotFound(_))
    ));

    let mut arity = Expr::function(Function::ToInteger, None);
    assert!(matches!(
        arity.validate_columns(&tables()),
        Err(Error::Syntax(_))
    ));
}

#[test]
fn ambiguous_unqualified_column() {
    let mut tables = tables();
    tables[1].meta.columns.push(Column::new("a", DataType::Integer));
    let mut expr = Expr::unqualified("a");
    assert!(matches!(
        expr.validate_columns(&tables),
        Err(Error::AmbiguousColumn(_))
    ));
}

#[test]
fn functions_convert_and_aggregates_pass_through() {
    let none: [&dyn RowSource; 0] = [];
    let int = Expr::function(Function::ToInteger, Some(Expr::value("42")));
    assert_eq!(
        eval(&int, EvalMode::Full, &none),
        Evaluated::Value(Value::Integer(42))
    );

    let text = Expr::function(Function::ToText, Some(Expr::value(1.5)));
    assert_eq!(
        eval(&text, EvalMode::Full, &none),
        Evaluated::Value(Value::from("1.5"))
    );

    let bad = Expr::function(Function::ToBoolean, Some(Expr::value("maybe")));
    assert!(matches!(
        bad.evaluate(EvalMode::Full, &none),
        Err(Error::Conversion(_))
    ));

    let sum = Expr::function(Function::Sum, Some(Expr::value(7)));
    assert_eq!(
        eval(&sum, EvalMode::Full, &none),
        Evaluated::Value(Value::Integer(7))
    );
    assert_eq!(
        eval(&Expr::count(), EvalMode::Full, &none),
        Evaluated::Value(Value::Null)
    );
}

#[test]
fn arithmetic_and_negation_errors() {
    let none: [&dyn RowSource; 0] = [];
    let div = Expr::binary(BinaryOperator::Divide, Expr::value(1), Expr::value(0));
    assert!(matches!(
        div.evaluate(EvalMode::Full, &none),
        Err(Error::DivisionByZero)
    ));

    let overflow = Expr::binary(
        BinaryOperator::Add,
        Expr::value(i64::MAX),
        Expr::value(1),
    );
    assert!(matches!(
        overflow.evaluate(EvalMode::Full, &none),
        Err(Error::Overflow(_))
    ));

    let negate_text = Expr::negate(Expr::value("abc"));
    assert!(matches!(
        negate_text.evaluate(EvalMode::Full, &none),
        Err(Error::Syntax(_))
    ));

    let mixed = Expr::binary(BinaryOperator::Lt, Expr::value("a"), Expr::value(1));
    assert!(matches!(
        mixed.evaluate(EvalMode::Full, &none),
        Err(Error::TypeMismatch(_))
    ));

    let promoted = Expr::binary(BinaryOperator::Multiply, Expr::value(2), Expr::value(1.5));
    assert_eq!(
        eval(&promoted, EvalMode::Full, &none),
        Evaluated::Value(Value::Real(3.0))
    );
}

#[test]
fn null_logic_follows_three_valued_rules() {
    let none: [&dyn RowSource; 0] = [];
    let and = Expr::binary(
        BinaryOperator::And,
        Expr::value(Value::Null),
        Expr::value(false),
    );
    assert_eq!(
        eval(&and, EvalMode::Full, &none),
        Evaluated::Value(Value::Boolean(false))
    );

    let or = Expr::binary(BinaryOperator::Or, Expr::value(Value::Null), Expr::value(false));
    assert_eq!(eval(&or, EvalMode::Full, &none), Evaluated::Value(Value::Null));

    let compare = Expr::binary(BinaryOperator::Eq, Expr::value(Value::Null), Expr::value(1));
    assert_eq!(eval(&compare, EvalMode::Full, &none), Evaluated::Value(Value::Null));
}

#[test]
fn projected_rows_are_addressed_by_position() {
    let values = [Value::from("CAN"), Value::Integer(11)];
    let row = ProjectedRow::new(0, &values);
    let rows = [row];
    let sources = as_sources(&rows);
    assert_eq!(sources[0].column_value_by_index(1).unwrap(), Value::Integer(11));
    assert!(sources[0].column_value_by_index(2).unwrap_err().is_internal());
}
