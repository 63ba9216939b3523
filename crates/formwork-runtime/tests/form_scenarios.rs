//! End-to-end form scenarios exercised through the public API only.

use std::cell::Cell;
use std::rc::Rc;

use formwork_core::kinds::{NumberField, TextField};
use formwork_core::{FieldDescriptor, FormError, Value, value_map};
use formwork_runtime::{
    CrossFieldRule, DependencyRule, FieldConfig, Form, FormConfig, HistoryConfig,
};
use pretty_assertions::assert_eq;

fn order_form() -> Form {
    Form::builder()
        .field(FieldDescriptor::new("price", NumberField::decimal().min(0.0)))
        .field(FieldDescriptor::new("qty", NumberField::integer().min(1.0)))
        .field_with(
            FieldDescriptor::new("total", NumberField::decimal().decimals(2)),
            FieldConfig::new().readonly().depends(
                DependencyRule::new(["price", "qty"]).compute(|v| {
                    let n = |k: &str| v.get(k).and_then(Value::as_f64).unwrap_or(0.0);
                    Value::Float(n("price") * n("qty"))
                }),
            ),
        )
        .field_with(
            FieldDescriptor::new("shipping", NumberField::decimal()),
            FieldConfig::new().depends(
                DependencyRule::new(["total"])
                    .show_when(|v| v.get("total").and_then(Value::as_f64).unwrap_or(0.0) > 0.0)
                    .enable_when(|v| v.get("total").and_then(Value::as_f64).unwrap_or(0.0) < 1000.0),
            ),
        )
        .history(HistoryConfig {
            max_size: 20,
            debounce_ms: 0,
        })
        .build()
        .expect("order form builds")
}

#[test]
fn price_times_quantity() {
    let form = order_form();
    form.set_value("price", 100).unwrap();
    form.set_value("qty", 5).unwrap();

    let total = form.field("total").unwrap();
    assert_eq!(total.value().get(), Value::Float(500.0));
    assert_eq!(form.format_value("total").unwrap(), "500.00");
    assert!(form.valid().get());
}

#[test]
fn computed_values_drive_visibility_transitively() {
    let form = order_form();
    let shipping = form.field("shipping").unwrap();
    assert!(!shipping.visible().get());

    form.patch_values(value_map([("price", Value::Int(300)), ("qty", Value::Int(2))]))
        .unwrap();
    assert!(shipping.visible().get());
    assert!(shipping.enabled().get());

    form.set_value("qty", 4).unwrap();
    assert!(!shipping.enabled().get());
    assert_eq!(
        form.visible_fields().get(),
        vec!["price".to_string(), "qty".into(), "total".into(), "shipping".into()]
    );
}

#[test]
fn dirty_values_only_contain_edits() {
    let form = Form::builder()
        .field(FieldDescriptor::new("name", TextField::new()))
        .field(FieldDescriptor::new("age", NumberField::integer()))
        .initial_values(value_map([("name", Value::from("a")), ("age", Value::Int(1))]))
        .build()
        .unwrap();

    assert!(form.get_dirty_values().is_empty());
    form.set_value("name", "b").unwrap();
    assert_eq!(form.get_dirty_values(), value_map([("name", "b")]));
}

#[test]
fn password_confirmation() {
    let form = Form::builder()
        .field(FieldDescriptor::new("password", TextField::new().required()))
        .field(FieldDescriptor::new("confirmPassword", TextField::new().required()))
        .cross_rule(CrossFieldRule::new(["password", "confirmPassword"], |v| {
            (v.get("password") != v.get("confirmPassword"))
                .then(|| "Passwords must match".to_owned())
        }))
        .build()
        .unwrap();

    form.set_value("password", "correct horse").unwrap();
    form.set_value("confirmPassword", "battery staple").unwrap();
    assert_eq!(form.cross_errors().get().len(), 1);
    assert!(!form.valid().get());

    form.set_value("confirmPassword", "correct horse").unwrap();
    assert_eq!(form.cross_errors().get().len(), 0);
    assert!(form.valid().get());
}

#[test]
fn mutual_dependency_is_fatal() {
    let err = Form::builder()
        .field_with(
            FieldDescriptor::new("a", TextField::new()),
            FieldConfig::new().depends(DependencyRule::new(["b"]).compute(|_| Value::Int(1))),
        )
        .field_with(
            FieldDescriptor::new("b", TextField::new()),
            FieldConfig::new().depends(DependencyRule::new(["a"]).compute(|_| Value::Int(2))),
        )
        .build()
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
}

#[test]
fn errors_stay_hidden_until_touched() {
    let form = Form::builder()
        .field(FieldDescriptor::new("email", TextField::new().required()))
        .field(FieldDescriptor::new("nick", TextField::new().min_len(3)))
        .build()
        .unwrap();

    form.set_value("nick", "ab").unwrap();
    for field in form.fields() {
        assert_eq!(field.error().get(), None, "{} leaked an error", field.name());
    }
    assert!(!form.valid().get());

    form.touch("nick").unwrap();
    assert!(form.field("nick").unwrap().error().get().is_some());
    assert_eq!(form.field("email").unwrap().error().get(), None);

    form.touch_all().unwrap();
    assert!(form.errors().get().values().all(Option::is_some));
}

#[test]
fn history_walk_with_checkpoints() {
    let form = order_form();
    form.set_value("price", 10).unwrap();
    form.checkpoint("priced").unwrap();
    form.set_value("qty", 2).unwrap();
    form.set_value("qty", 3).unwrap();

    assert!(form.undo().unwrap());
    assert_eq!(form.field("total").unwrap().value().get(), Value::Float(20.0));
    form.go_to_checkpoint("priced").unwrap();
    assert_eq!(form.field("qty").unwrap().value().get(), Value::Null);
    assert_eq!(form.field("total").unwrap().value().get(), Value::Float(0.0));
    assert!(form.can_redo());

    form.set_value("qty", 7).unwrap();
    assert!(!form.can_redo(), "a new edit discards the redo branch");
    assert_eq!(form.field("total").unwrap().value().get(), Value::Float(70.0));
}

#[test]
fn history_is_bounded_by_config() {
    let config = FormConfig::from_json_str(r#"{"history": {"max_size": 3}}"#).unwrap();
    let form = Form::builder()
        .field(FieldDescriptor::new("n", NumberField::integer()))
        .config(config)
        .build()
        .unwrap();
    for n in 1..=10 {
        form.set_value("n", n).unwrap();
    }
    let mut undone = 0;
    while form.undo().unwrap() {
        undone += 1;
    }
    assert_eq!(undone, 3);
    assert_eq!(form.field("n").unwrap().value().get(), Value::Int(7));
}

#[test]
fn dependency_reaction_resets_stale_choice() {
    let reactions = Rc::new(Cell::new(0));
    let seen = Rc::clone(&reactions);
    let form = Form::builder()
        .field(FieldDescriptor::new("country", TextField::new()))
        .field_with(
            FieldDescriptor::new("region", TextField::new()),
            FieldConfig::new().depends(DependencyRule::new(["country"]).on_dependency_change(
                move |ctx| {
                    seen.set(seen.get() + 1);
                    ctx.reset();
                },
            )),
        )
        .initial_values(value_map([("country", "NZ"), ("region", "Otago")]))
        .build()
        .unwrap();

    form.set_value("region", "Canterbury").unwrap();
    form.set_value("country", "AU").unwrap();
    assert_eq!(reactions.get(), 1);
    assert_eq!(form.field("region").unwrap().value().get(), Value::from("Otago"));
}

/// `region` is cleared whenever `country` changes.
fn address_form(reactions: Rc<Cell<u32>>) -> Form {
    Form::builder()
        .field(FieldDescriptor::new("country", TextField::new()))
        .field_with(
            FieldDescriptor::new("region", TextField::new()),
            FieldConfig::new().depends(DependencyRule::new(["country"]).on_dependency_change(
                move |ctx| {
                    reactions.set(reactions.get() + 1);
                    ctx.set_value("");
                },
            )),
        )
        .initial_values(value_map([("country", "NZ"), ("region", "Otago")]))
        .history(HistoryConfig::default())
        .build()
        .unwrap()
}

#[test]
fn undo_restores_recorded_state_despite_reactions() {
    let reactions = Rc::new(Cell::new(0));
    let form = address_form(Rc::clone(&reactions));
    form.set_value("country", "AU").unwrap();
    form.set_value("region", "Sydney").unwrap();
    assert_eq!(reactions.get(), 1);

    form.undo().unwrap();
    form.undo().unwrap();
    let history = form.history().unwrap();
    assert_eq!(form.values().get(), history.current());
    assert_eq!(form.field("region").unwrap().value().get(), Value::from("Otago"));

    form.redo().unwrap();
    assert_eq!(form.values().get(), history.current());
    assert_eq!(form.field("region").unwrap().value().get(), Value::from(""));
    assert_eq!(reactions.get(), 1, "restores never run reactions");
}

#[test]
fn reactions_resume_after_restore() {
    let reactions = Rc::new(Cell::new(0));
    let form = address_form(Rc::clone(&reactions));
    form.set_value("country", "AU").unwrap();
    form.set_value("region", "Sydney").unwrap();
    form.checkpoint("sydney").unwrap();
    form.undo().unwrap();
    form.go_to_checkpoint("sydney").unwrap();
    assert_eq!(form.field("region").unwrap().value().get(), Value::from("Sydney"));

    form.set_value("country", "US").unwrap();
    assert_eq!(reactions.get(), 2);
    assert_eq!(form.field("region").unwrap().value().get(), Value::from(""));
}

#[test]
fn undo_inside_outer_batch_still_matches_history() {
    let form = address_form(Rc::new(Cell::new(0)));
    form.set_value("country", "AU").unwrap();
    form.set_value("region", "Perth").unwrap();
    form.undo().unwrap();
    formwork_runtime::batch(|| form.undo().unwrap());
    assert_eq!(form.values().get(), form.history().unwrap().current());
}

#[test]
fn destroy_twice_leaves_nothing_running() {
    let form = order_form();
    form.set_value("price", 1).unwrap();
    form.destroy();
    form.destroy();

    assert!(form.is_destroyed());
    assert_eq!(form.resolver().effect_count(), 0);
    assert!(!form.has_pending_work());
    assert!(matches!(form.set_value("qty", 1), Err(FormError::Destroyed)));

    // Effects are gone: writing a field cell directly no longer propagates.
    form.field("qty").unwrap().value().set(Value::Int(9));
    assert_eq!(form.field("total").unwrap().value().get(), Value::Float(0.0));
}

#[test]
fn trusted_values_for_hand_off() {
    let form = order_form();
    form.set_input("price", " 12.5 ").unwrap();
    form.set_input("qty", "2").unwrap();
    let values = form.get_values();
    assert_eq!(values["price"], Value::Float(12.5));
    assert_eq!(values["qty"], Value::Int(2));
    assert_eq!(values["total"], Value::Float(25.0));
    let json = Value::Map(values).to_json().unwrap();
    assert_eq!(json["qty"], serde_json::json!(2));
}
