use std::collections::HashMap;

use crate::error::{EvalError, ParamGenError};
use crate::expand::{self, expand_vars, ExpandValue};
use crate::guard::{self, KeyKind};
use crate::interpreter::{self, EvalLimits, Mode, Value};
use crate::tree::*;
use crate::{formula, json, namelist, parser, validate, ParamGen};

// ── Shared helpers ──────────────────────────────────────────────────

/// Embed fixture files at compile time.
const REDUCE_FIXTURES: &str = include_str!("../test-data/fixtures/reduce.json");

fn node(value: serde_json::Value) -> Node {
    json::from_json_value(&value).unwrap()
}

fn vars(pairs: &[(&str, ExpandValue)]) -> HashMap<String, ExpandValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn reduce_json(
    input: serde_json::Value,
    env: &HashMap<String, ExpandValue>,
    policy: MatchPolicy,
) -> Result<Node, ParamGenError> {
    let mut pg = ParamGen::new(node(input))?.with_match(policy);
    pg.reduce(expand::from_map(env))?;
    Ok(pg.data().clone())
}

fn eval(source: &str) -> Result<Value, EvalError> {
    interpreter::eval_str(source, &EvalLimits::default(), Mode::Normal)
}

fn vars_from_fixture(fixture: &serde_json::Value) -> HashMap<String, ExpandValue> {
    let mut env = HashMap::new();
    if let Some(obj) = fixture.get("vars").and_then(|v| v.as_object()) {
        for (name, value) in obj {
            let value = match value {
                serde_json::Value::String(s) => ExpandValue::String(s.clone()),
                serde_json::Value::Bool(b) => ExpandValue::Boolean(*b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => ExpandValue::Integer(i),
                    None => ExpandValue::Float(n.as_f64().unwrap()),
                },
                other => panic!("unsupported fixture variable {}: {}", name, other),
            };
            env.insert(name.clone(), value);
        }
    }
    env
}

// ── Fixture runner ──────────────────────────────────────────────────

#[test]
fn test_fixture_reduce() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(REDUCE_FIXTURES).unwrap();
    assert!(!fixtures.is_empty(), "no reduce fixtures found");

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let env = vars_from_fixture(fixture);
        let policy: MatchPolicy = fixture
            .get("match")
            .and_then(|v| v.as_str())
            .map(|s| s.parse().unwrap())
            .unwrap_or_default();

        let result = reduce_json(fixture["input"].clone(), &env, policy);

        if let Some(code) = fixture.get("expectError").and_then(|v| v.as_str()) {
            match result {
                Ok(value) => panic!(
                    "Fixture '{}': expected error '{}' but got {}",
                    name,
                    code,
                    value.to_json()
                ),
                Err(err) => assert_eq!(
                    err.code(),
                    code,
                    "Fixture '{}': wrong error kind ({})",
                    name,
                    err
                ),
            }
            continue;
        }

        let actual = match result {
            Ok(value) => value,
            Err(err) => panic!("Fixture '{}': unexpected error: {}", name, err),
        };
        let expected = node(fixture["expected"].clone());
        assert_eq!(
            actual,
            expected,
            "Fixture '{}': got {}, expected {}",
            name,
            actual.to_json(),
            expected.to_json()
        );
    }
}

// ── Reduction properties ────────────────────────────────────────────

#[test]
fn test_reduce_boolean_literal_guards() {
    let mut pg = ParamGen::new(node(serde_json::json!({"False": 1, "True": 2}))).unwrap();
    pg.reduce_with(None).unwrap();
    assert_eq!(pg.data(), &Node::from(2i64));
    assert!(pg.reduced(), "instance should be marked reduced");
}

#[test]
fn test_nested_guards_collapse() {
    let input = serde_json::json!({"False": 1, "True": {"2>3": 0, "2<3": 2}});
    let result = reduce_json(input, &HashMap::new(), MatchPolicy::Last).unwrap();
    assert_eq!(result, Node::from(2i64));
}

#[test]
fn test_outer_guards_select_a_mapping() {
    let input = serde_json::json!({
        "False": {"param": "foo"},
        "True": {"param": "bar"},
    });
    let result = reduce_json(input, &HashMap::new(), MatchPolicy::Last).unwrap();
    assert_eq!(result, node(serde_json::json!({"param": "bar"})));
}

#[test]
fn test_match_policy() {
    let input = serde_json::json!({"1<2": "foo", "2<3": "bar", "3<4": "baz"});
    let last = reduce_json(input.clone(), &HashMap::new(), MatchPolicy::Last).unwrap();
    let first = reduce_json(input, &HashMap::new(), MatchPolicy::First).unwrap();
    assert_eq!(last, Node::from("baz"));
    assert_eq!(first, Node::from("foo"));
}

#[test]
fn test_no_match_is_absent() {
    let input = serde_json::json!({"param": {"1<0": "a"}, "other": 1});
    let result = reduce_json(input, &HashMap::new(), MatchPolicy::Last).unwrap();
    assert_eq!(result.get("param"), Some(&Node::Absent));
    assert_eq!(result.get("other"), Some(&Node::from(1i64)));
}

#[test]
fn test_else_only_when_nothing_else_matches() {
    for input in [
        serde_json::json!({"else": "fallback", "1 < 2": "explicit"}),
        serde_json::json!({"1 < 2": "explicit", "else": "fallback"}),
    ] {
        for policy in [MatchPolicy::First, MatchPolicy::Last] {
            let result = reduce_json(input.clone(), &HashMap::new(), policy).unwrap();
            assert_eq!(result, Node::from("explicit"), "policy {} picked else", policy);
        }
    }

    let input = serde_json::json!({"1 > 2": "explicit", "else": "fallback"});
    let result = reduce_json(input, &HashMap::new(), MatchPolicy::Last).unwrap();
    assert_eq!(result, Node::from("fallback"));
}

#[test]
fn test_undefined_variable_in_unreached_branch() {
    let env = vars(&[("alpha", 1i64.into()), ("beta", false.into())]);
    let input = serde_json::json!({"param": {"$alpha >= 1": "foo", "${beta}": {"${zeta}": "bar"}}});
    let result = reduce_json(input, &env, MatchPolicy::Last).unwrap();
    assert_eq!(result, node(serde_json::json!({"param": "foo"})));

    let env = vars(&[("beta", false.into())]);
    let input = serde_json::json!({"False": 1, "True": {"${beta}": {"${zeta}": "bar"}}});
    let result = reduce_json(input, &env, MatchPolicy::Last).unwrap();
    assert_eq!(result, Node::Absent);
}

#[test]
fn test_undefined_variable_in_reached_branch() {
    let env = vars(&[("beta", true.into())]);
    let input = serde_json::json!({"param": {"${beta}": {"${zeta}": "bar"}}});
    let err = reduce_json(input, &env, MatchPolicy::Last).unwrap_err();
    match err {
        ParamGenError::UndefinedVariable { name, .. } => assert_eq!(name, "zeta"),
        other => panic!("expected UndefinedVariable, got {:?}", other),
    }
}

#[test]
fn test_expandable_vars_in_guards() {
    let env = vars(&[
        ("alpha", 1i64.into()),
        ("beta", false.into()),
        ("gamma", "xyz".into()),
    ]);
    let input = serde_json::json!({
        "param": {"$alpha > 1": "foo", "${beta}": "bar", "\"x\" in $gamma": "baz"}
    });
    let result = reduce_json(input, &env, MatchPolicy::Last).unwrap();
    assert_eq!(result, node(serde_json::json!({"param": "baz"})));
}

#[test]
fn test_formula_expansion() {
    let env = vars(&[("alpha", 3i64.into())]);
    let input = serde_json::json!({"x": "= $alpha **2", "y": "= [i for i in range(3)]"});
    let result = reduce_json(input, &env, MatchPolicy::Last).unwrap();
    assert_eq!(result.get("x"), Some(&Node::from(9i64)));
    assert_eq!(
        result.get("y"),
        Some(&Node::Scalar(Scalar::List(vec![
            Scalar::Integer(0),
            Scalar::Integer(1),
            Scalar::Integer(2),
        ])))
    );
}

#[test]
fn test_plain_mapping_keeps_key_order() {
    let input = serde_json::json!({"zeta": "= 1 + 1", "alpha": {"True": "a"}, "mid": 3});
    let result = reduce_json(input, &HashMap::new(), MatchPolicy::Last).unwrap();
    let keys: Vec<&String> = result.as_mapping().unwrap().keys().collect();
    assert_eq!(keys, ["zeta", "alpha", "mid"]);
    assert_eq!(result.to_json(), r#"{"zeta":2,"alpha":"a","mid":3}"#);
}

#[test]
fn test_expanded_keys_keep_their_position() {
    let env = vars(&[("NAME", "grid".into())]);
    let input = serde_json::json!({"a": 1, "${NAME}_file": "x.nc", "b": 2});
    let result = reduce_json(input, &env, MatchPolicy::Last).unwrap();
    assert_eq!(result.to_json(), r#"{"a":1,"grid_file":"x.nc","b":2}"#);
}

#[test]
fn test_reduce_without_expand_function_keeps_tokens() {
    let input = serde_json::json!({"path": "${ROOT}/data", "flag": {"1 == 1": "yes"}});
    let mut pg = ParamGen::new(node(input)).unwrap();
    pg.reduce_with(None).unwrap();
    assert_eq!(pg.data().get("path"), Some(&Node::from("${ROOT}/data")));
    assert_eq!(pg.data().get("flag"), Some(&Node::from("yes")));
}

#[test]
fn test_ambiguous_guard_mix() {
    let input = serde_json::json!({"1 < 2": "guard", "plain_key": "value"});
    let err = reduce_json(input, &HashMap::new(), MatchPolicy::Last).unwrap_err();
    match err {
        ParamGenError::AmbiguousGuardMix { guards, plain } => {
            assert_eq!(guards, vec!["1 < 2".to_string()]);
            assert_eq!(plain, vec!["plain_key".to_string()]);
        }
        other => panic!("expected AmbiguousGuardMix, got {:?}", other),
    }
}

#[test]
fn test_failed_reduce_leaves_instance_unchanged() {
    let input = serde_json::json!({"x": "= 1 +"});
    let mut pg = ParamGen::new(node(input.clone())).unwrap();
    let err = pg.reduce_with(None).unwrap_err();
    assert_eq!(err.code(), "formula-evaluation");
    assert!(!pg.reduced(), "failed reduce must not mark the instance reduced");
    assert_eq!(pg.data(), &node(input));
}

// ── MOM-style configuration ─────────────────────────────────────────

fn mom_input() -> serde_json::Value {
    serde_json::json!({
        "Global": {
            "INPUTDIR": {"value": "${DIN_LOC_ROOT}/ocn/mom/${OCN_GRID}"},
            "RESTORE_SALINITY": {
                "value": {
                    "$OCN_GRID == \"tx0.66v1\" and $COMP_ATM == \"datm\"": true,
                    "else": false
                }
            },
            "INIT_LAYERS_FROM_Z_FILE": {
                "value": {
                    "$OCN_GRID == \"gx1v6\"": true,
                    "$OCN_GRID == \"tx0.66v1\"": true,
                    "$OCN_GRID == \"tx0.25v1\"": true
                }
            },
            "TEMP_SALT_Z_INIT_FILE": {
                "value": {
                    "$OCN_GRID == \"gx1v6\"": "WOA05_pottemp_salt.nc",
                    "$OCN_GRID == \"tx0.66v1\"": "woa18_04_initial_conditions.nc",
                    "$OCN_GRID == \"tx0.25v1\"": "MOM6_IC_TS.nc"
                }
            }
        }
    })
}

fn case_vars() -> HashMap<String, ExpandValue> {
    vars(&[
        ("DIN_LOC_ROOT", "/foo/inputdata".into()),
        ("OCN_GRID", "tx0.66v1".into()),
        ("COMP_ATM", "datm".into()),
    ])
}

#[test]
fn test_mom_input() {
    let result = reduce_json(mom_input(), &case_vars(), MatchPolicy::Last).unwrap();
    let expected = node(serde_json::json!({
        "Global": {
            "INPUTDIR": {"value": "/foo/inputdata/ocn/mom/tx0.66v1"},
            "RESTORE_SALINITY": {"value": true},
            "INIT_LAYERS_FROM_Z_FILE": {"value": true},
            "TEMP_SALT_Z_INIT_FILE": {"value": "woa18_04_initial_conditions.nc"}
        }
    }));
    assert_eq!(result, expected, "got {}", result.to_json_pretty());
}

#[test]
fn test_input_data_list_uses_reduced_values() {
    let mom = reduce_json(mom_input(), &case_vars(), MatchPolicy::Last).unwrap();

    // Variables not known to the case fall back to the reduced MOM values.
    let case = case_vars();
    let lookup = |name: &str| {
        case.get(name).cloned().or_else(|| {
            mom.get_path(&["Global", name, "value"])
                .and_then(Node::as_scalar)
                .map(|s| ExpandValue::String(s.to_string().trim().to_string()))
        })
    };

    let input = serde_json::json!({
        "mom.input_data_list": {
            "ocean_hgrid": {
                "$OCN_GRID == \"gx1v6\"": "${INPUTDIR}/ocean_hgrid.nc",
                "$OCN_GRID == \"tx0.66v1\"": "${INPUTDIR}/ocean_hgrid_180829.nc",
                "$OCN_GRID == \"tx0.25v1\"": "${INPUTDIR}/ocean_hgrid.nc"
            },
            "tempsalt": {
                "$OCN_GRID in [\"gx1v6\", \"tx0.66v1\", \"tx0.25v1\"]": {
                    "$INIT_LAYERS_FROM_Z_FILE == \"True\"": "${INPUTDIR}/${TEMP_SALT_Z_INIT_FILE}"
                }
            }
        }
    });
    let mut pg = ParamGen::new(node(input)).unwrap();
    pg.reduce(lookup).unwrap();

    let expected = node(serde_json::json!({
        "mom.input_data_list": {
            "ocean_hgrid": "/foo/inputdata/ocn/mom/tx0.66v1/ocean_hgrid_180829.nc",
            "tempsalt": "/foo/inputdata/ocn/mom/tx0.66v1/woa18_04_initial_conditions.nc"
        }
    }));
    assert_eq!(pg.data(), &expected, "got {}", pg.data().to_json_pretty());
}

// ── Namelist-entry style guards ─────────────────────────────────────

fn entry_template() -> serde_json::Value {
    serde_json::json!({
        "test_nml": {
            "foo": {"values": {
                "else": "alpha",
                "$cice_mode == \"thermo_only\"": "beta",
                "$cice_mode == \"prescribed\"": "gamma"
            }},
            "bar": {"values": {
                "${some_int} == 2 and $some_bool == \"True\" and ${some_float} == 3.1415": "delta",
                "$ICE_GRID .startswith(\"gx1v\")": "epsilon"
            }},
            "baz": {"values": {
                "${some_int} == -9999": "zeta",
                "not $ICE_GRID .startswith(\"gx1v\")": "eta"
            }}
        }
    })
}

fn demo_vars() -> HashMap<String, ExpandValue> {
    vars(&[
        ("ICE_GRID", "gx1v6".into()),
        ("DIN_LOC_ROOT", "/glade/p/cesmdata/cseg/inputdata".into()),
        ("cice_mode", "thermo_only".into()),
        ("some_bool", "True".into()),
        ("some_int", 2i64.into()),
        ("some_float", "3.1415".into()),
    ])
}

#[test]
fn test_entry_single_guard() {
    let result = reduce_json(entry_template(), &demo_vars(), MatchPolicy::Last).unwrap();
    assert_eq!(
        result.get_path(&["test_nml", "foo", "values"]),
        Some(&Node::from("beta"))
    );
}

#[test]
fn test_entry_mixed_guards() {
    let last = reduce_json(entry_template(), &demo_vars(), MatchPolicy::Last).unwrap();
    assert_eq!(
        last.get_path(&["test_nml", "bar", "values"]),
        Some(&Node::from("epsilon"))
    );
    let first = reduce_json(entry_template(), &demo_vars(), MatchPolicy::First).unwrap();
    assert_eq!(
        first.get_path(&["test_nml", "bar", "values"]),
        Some(&Node::from("delta"))
    );
}

#[test]
fn test_entry_no_match() {
    let result = reduce_json(entry_template(), &demo_vars(), MatchPolicy::Last).unwrap();
    assert_eq!(
        result.get_path(&["test_nml", "baz", "values"]),
        Some(&Node::Absent)
    );
}

#[test]
fn test_entry_default_value() {
    let entry = entry_template()["test_nml"]["foo"].clone();
    let mut pg = ParamGen::new(node(serde_json::json!({"test_nml": entry}))).unwrap();
    pg.reduce(|_: &str| Some(ExpandValue::from("_"))).unwrap();
    assert_eq!(
        pg.data().get_path(&["test_nml", "values"]),
        Some(&Node::from("alpha"))
    );
}

// ── Parameter set lifecycle ─────────────────────────────────────────

#[test]
fn test_empty_input_rejected() {
    let err = ParamGen::new(Node::mapping()).unwrap_err();
    assert_eq!(err.code(), "empty-input");

    let err = ParamGen::new(Node::from(1i64)).unwrap_err();
    assert_eq!(err.code(), "invalid-data");
}

#[test]
fn test_reduce_twice_errors() {
    let mut pg = ParamGen::new(node(serde_json::json!({"a": 1}))).unwrap();
    pg.reduce_with(None).unwrap();
    let err = pg.reduce_with(None).unwrap_err();
    assert!(
        matches!(err, ParamGenError::AlreadyReduced),
        "expected AlreadyReduced, got {:?}",
        err
    );
}

#[test]
fn test_reset_then_reduce_reproduces_result() {
    let env = vars(&[("alpha", 3i64.into())]);
    let input = serde_json::json!({"x": "= $alpha * 2", "y": {"$alpha > 2": "big", "else": "small"}});
    let mut pg = ParamGen::new(node(input.clone())).unwrap();

    pg.reduce(expand::from_map(&env)).unwrap();
    let first = pg.data().clone();

    pg.reset();
    assert!(!pg.reduced(), "reset must clear the reduced flag");
    assert_eq!(pg.data(), &node(input), "reset must restore the original tree");
    assert_eq!(pg.data(), pg.original());

    pg.reduce(expand::from_map(&env)).unwrap();
    assert_eq!(pg.data(), &first);

    pg.reset();
    pg.reset();
    assert_eq!(pg.data(), pg.original(), "reset is idempotent");
}

#[test]
fn test_append_merges_recursively() {
    let mut a = ParamGen::new(node(serde_json::json!({"a": 1, "b": 2}))).unwrap();
    let b = ParamGen::new(node(serde_json::json!({"b": 3, "c": 4}))).unwrap();
    a.append(&b).unwrap();
    assert_eq!(a.data().to_json(), r#"{"a":1,"b":3,"c":4}"#);

    let mut a = ParamGen::new(node(serde_json::json!({"g": {"x": 1, "y": 2}, "h": 0}))).unwrap();
    let b = ParamGen::new(node(serde_json::json!({"g": {"y": 5, "z": 6}}))).unwrap();
    a.append(&b).unwrap();
    assert_eq!(a.data().to_json(), r#"{"g":{"x":1,"y":5,"z":6},"h":0}"#);
}

#[test]
fn test_append_overwrites_mapping_with_scalar() {
    let mut a = ParamGen::new(node(serde_json::json!({"g": {"x": 1}}))).unwrap();
    let b = ParamGen::new(node(serde_json::json!({"g": "flat"}))).unwrap();
    a.append(&b).unwrap();
    assert_eq!(a.data().to_json(), r#"{"g":"flat"}"#);
}

#[test]
fn test_append_lifecycle_mismatch() {
    let mut a = ParamGen::new(node(serde_json::json!({"a": 1}))).unwrap();
    let mut b = ParamGen::new(node(serde_json::json!({"b": 1}))).unwrap();
    b.reduce_with(None).unwrap();
    let err = a.append(&b).unwrap_err();
    assert_eq!(err.code(), "lifecycle-mismatch");

    a.reduce_with(None).unwrap();
    a.append(&b).unwrap();
    assert_eq!(a.data().to_json(), r#"{"a":1,"b":1}"#);
}

#[test]
fn test_reduce_empty_after_append_and_reset() {
    let mut pg = ParamGen::new(node(serde_json::json!({"1 > 2": {"a": 1}}))).unwrap();
    pg.reduce_with(None).unwrap();
    assert!(pg.is_empty(), "all-false top level reduces to nothing");
    pg.reset();
    assert!(!pg.is_empty());
}

#[test]
fn test_builder_settings() {
    let limits = EvalLimits {
        max_depth: 8,
        ..EvalLimits::default()
    };
    let pg = ParamGen::from_json(r#"{"a": 1}"#)
        .unwrap()
        .with_match(MatchPolicy::First)
        .with_limits(limits);
    assert_eq!(pg.match_policy(), MatchPolicy::First);
    assert_eq!(pg.limits().max_depth, 8);
}

#[test]
fn test_match_policy_from_str() {
    assert_eq!("FIRST".parse::<MatchPolicy>().unwrap(), MatchPolicy::First);
    assert_eq!(" last ".parse::<MatchPolicy>().unwrap(), MatchPolicy::Last);
    let err = "middle".parse::<MatchPolicy>().unwrap_err();
    assert_eq!(err.code(), "invalid-match-policy");
}

// ── Variable expansion ──────────────────────────────────────────────

#[test]
fn test_expand_quoting_rules() {
    let env = vars(&[
        ("GRID", "gx1v6".into()),
        ("N", 4i64.into()),
        ("PI", 3.1415f64.into()),
        ("FLAG", true.into()),
    ]);
    let mut f = expand::from_map(&env);
    assert_eq!(
        expand_vars("$GRID == ${GRID}", Some(&mut f)).unwrap(),
        "\"gx1v6\" == gx1v6"
    );
    assert_eq!(
        expand_vars("$N + ${N} + $PI", Some(&mut f)).unwrap(),
        "4 + 4 + 3.1415"
    );
    assert_eq!(expand_vars("$FLAG", Some(&mut f)).unwrap(), "True");
}

#[test]
fn test_expand_floats_read_back_as_floats() {
    let cases = [
        (1e20, "1e+20"),
        (1e16, "1e+16"),
        (1e-5, "1e-05"),
        (-2.5e-7, "-2.5e-07"),
        (1e15, "1000000000000000.0"),
        (0.0001, "0.0001"),
        (3.0, "3.0"),
        (-0.0, "-0.0"),
    ];
    for (x, text) in cases {
        let env = vars(&[("X", x.into())]);
        let mut f = expand::from_map(&env);
        assert_eq!(expand_vars("$X", Some(&mut f)).unwrap(), text);
        assert_eq!(eval(text).unwrap(), Value::Float(x), "{} reads back", text);
    }
}

#[test]
fn test_reduce_with_large_and_small_float_variables() {
    let input = serde_json::json!({
        "double": "= $BIG * 2",
        "size": {"$BIG > 5": "big", "else": "small"},
        "edge": "= $EDGE",
        "tiny": "= $TINY",
    });
    let env = vars(&[("BIG", 1e20.into()), ("EDGE", 1e16.into()), ("TINY", 1e-5.into())]);
    let result = reduce_json(input, &env, MatchPolicy::Last).unwrap();
    assert_eq!(result.get("double"), Some(&Node::Scalar(Scalar::Float(2e20))));
    assert_eq!(result.get("size"), Some(&Node::string("big")));
    assert_eq!(result.get("edge"), Some(&Node::Scalar(Scalar::Float(1e16))));
    assert_eq!(result.get("tiny"), Some(&Node::Scalar(Scalar::Float(1e-5))));
}

#[test]
fn test_expand_escapes_quotes() {
    let env = vars(&[("S", "say \"hi\"".into())]);
    let mut f = expand::from_map(&env);
    let expanded = expand_vars("$S", Some(&mut f)).unwrap();
    assert_eq!(expanded, r#""say \"hi\"""#);
    assert_eq!(eval(&expanded).unwrap(), Value::Str("say \"hi\"".to_string()));
}

#[test]
fn test_expand_without_function_is_noop() {
    assert_eq!(expand_vars("$A + ${B}", None).unwrap(), "$A + ${B}");
}

#[test]
fn test_expand_undefined_variable() {
    let mut f = |_: &str| -> Option<ExpandValue> { None };
    let err = expand_vars("x + $missing", Some(&mut f)).unwrap_err();
    match err {
        ParamGenError::UndefinedVariable { name, expr } => {
            assert_eq!(name, "missing");
            assert_eq!(expr, "x + $missing");
        }
        other => panic!("expected UndefinedVariable, got {:?}", other),
    }
}

#[test]
fn test_expandable_var_scan() {
    assert!(expand::has_expandable_var("a ${B} c"));
    assert!(!expand::has_expandable_var("no vars $ here"));
    assert_eq!(
        expand::expandable_vars("$A and ${B} or $A"),
        vec!["A".to_string(), "B".to_string()]
    );
}

// ── Guards ──────────────────────────────────────────────────────────

#[test]
fn test_classify_keys() {
    let limits = EvalLimits::default();
    let cases = [
        ("else", KeyKind::Else),
        (" else ", KeyKind::Else),
        ("True", KeyKind::Guard(true)),
        ("1 > 2", KeyKind::Guard(false)),
        ("\"gx1v6\" .startswith(\"gx1v\")", KeyKind::Guard(true)),
        ("INPUTDIR", KeyKind::Plain),
        ("mom.input_data_list", KeyKind::Plain),
        ("a(1:3)", KeyKind::Plain),
        ("some key", KeyKind::Plain),
        ("42", KeyKind::Plain),
        ("$GRID == 1", KeyKind::Plain),
    ];
    for (key, expected) in cases {
        assert_eq!(
            guard::classify_key(key, &limits).unwrap(),
            expected,
            "key {:?}",
            key
        );
    }
}

#[test]
fn test_guard_evaluation_errors() {
    let limits = EvalLimits::default();
    let err = guard::classify_key("1 / 0 == 1", &limits).unwrap_err();
    assert_eq!(err.code(), "guard-evaluation");

    let err = guard::evaluate_guard("1 + 1", &limits).unwrap_err();
    assert_eq!(err.code(), "non-boolean-guard");

    let err = guard::evaluate_guard("$GRID == 1", &limits).unwrap_err();
    assert_eq!(err.code(), "unexpanded-variable");

    assert!(guard::evaluate_guard("else", &limits).unwrap());
    assert!(guard::is_guard_expression("2 in [1, 2]", &limits).unwrap());
    assert!(!guard::is_guard_expression("param", &limits).unwrap());
}

#[test]
fn test_select_branch() {
    let limits = EvalLimits::default();
    let mapping = node(serde_json::json!({"1 < 2": "a", "else": "b", "2 < 3": "c"}));
    let mapping = mapping.as_mapping().unwrap().clone();

    let first = guard::select_branch(mapping.clone(), MatchPolicy::First, &limits).unwrap();
    assert_eq!(first, Node::from("a"));
    let last = guard::select_branch(mapping, MatchPolicy::Last, &limits).unwrap();
    assert_eq!(last, Node::from("c"));

    let none = node(serde_json::json!({"False": 1}));
    let none = guard::select_branch(none.as_mapping().unwrap().clone(), MatchPolicy::Last, &limits);
    assert_eq!(none.unwrap(), Node::Absent);
}

#[test]
fn test_is_guarded() {
    let limits = EvalLimits::default();
    let guarded = node(serde_json::json!({"True": 1, "else": 2}));
    assert!(guard::is_guarded(guarded.as_mapping().unwrap(), &limits).unwrap());
    let plain = node(serde_json::json!({"a": 1, "b": 2}));
    assert!(!guard::is_guarded(plain.as_mapping().unwrap(), &limits).unwrap());
    assert!(!guard::is_guarded(&Mapping::new(), &limits).unwrap());
}

// ── Formulas ────────────────────────────────────────────────────────

#[test]
fn test_is_formula() {
    assert!(formula::is_formula("= 1 + 1"));
    assert!(formula::is_formula("  =x"));
    assert!(!formula::is_formula("a = b"));
    assert!(!formula::is_formula(""));
}

#[test]
fn test_formula_values() {
    let limits = EvalLimits::default();
    let cases: &[(&str, Node)] = &[
        ("= 3 * 5", Node::from(15i64)),
        ("= 7 / 2", Node::from(3.5f64)),
        ("= 7 // 2", Node::from(3i64)),
        ("= -7 % 3", Node::from(2i64)),
        ("= 2 ** -1", Node::from(0.5f64)),
        ("= -2 ** 2", Node::from(-4i64)),
        ("= 'ab' * 2 + 'c'", Node::from("ababc")),
        ("= 'x' if 1 > 2 else 'y'", Node::from("y")),
        ("= len([1, 2, 3]) == 3", Node::from(true)),
        ("= max(3, 9, 4) - min([5, 2])", Node::from(7i64)),
        ("= 'a,b'.split(',')[1].upper()", Node::from("B")),
        ("= 1 < 2 < 3", Node::from(true)),
        ("= None", Node::Absent),
    ];
    for (source, expected) in cases {
        let actual = formula::evaluate_formula(source, &limits).unwrap();
        assert_eq!(&actual, expected, "formula {:?}", source);
    }
}

#[test]
fn test_formula_comparison_type_error() {
    let limits = EvalLimits::default();
    let err = formula::evaluate_formula("= \"1\" == 1", &limits).unwrap_err();
    assert_eq!(err.code(), "comparison-type", "got {}", err);

    let err = formula::evaluate_formula("= 'a' < 2", &limits).unwrap_err();
    assert_eq!(err.code(), "comparison-type", "got {}", err);

    let err = formula::evaluate_formula("= \"a\" + 1", &limits).unwrap_err();
    match err {
        ParamGenError::ComparisonType { source, .. } => {
            assert!(matches!(source, EvalError::Type(_)), "got {:?}", source)
        }
        other => panic!("expected ComparisonType, got {:?}", other),
    }
}

#[test]
fn test_formula_evaluation_errors() {
    let limits = EvalLimits::default();
    for source in ["= 1 +", "= 1 / 0", "= undefined_name", "= [1, None]", "= [1][5]"] {
        let err = formula::evaluate_formula(source, &limits).unwrap_err();
        assert_eq!(err.code(), "formula-evaluation", "formula {:?}: {}", source, err);
    }
}

#[test]
fn test_formula_error_keeps_source() {
    let err = formula::evaluate_formula("= 1 / 0", &EvalLimits::default()).unwrap_err();
    match err {
        ParamGenError::FormulaEvaluation { formula, source } => {
            assert_eq!(formula, "= 1 / 0");
            assert_eq!(source, EvalError::ZeroDivision);
        }
        other => panic!("expected FormulaEvaluation, got {:?}", other),
    }
}

// ── Parser and evaluator ────────────────────────────────────────────

#[test]
fn test_parser_syntax_errors() {
    for source in ["1 +", "(1", "[1, 2", "'open", "x if y", "1 2", "and"] {
        let err = parser::parse(source, &EvalLimits::default()).unwrap_err();
        assert!(
            matches!(err, EvalError::Syntax { .. }),
            "expected syntax error for {:?}, got {:?}",
            source,
            err
        );
    }
}

#[test]
fn test_parser_depth_limit() {
    let deep = format!("{}1{}", "(".repeat(40), ")".repeat(40));
    assert!(parser::parse(&deep, &EvalLimits::default()).is_ok());
    let shallow = EvalLimits {
        max_depth: 10,
        ..EvalLimits::default()
    };
    let err = parser::parse(&deep, &shallow).unwrap_err();
    assert!(matches!(err, EvalError::Budget(_)), "got {:?}", err);
}

#[test]
fn test_operator_chains_count_towards_depth() {
    assert_eq!(eval(&vec!["1"; 30].join(" + ")).unwrap(), Value::Int(30));

    for chain in [
        vec!["1"; 10_000].join("+"),
        vec!["2"; 10_000].join(" * "),
        vec!["True"; 10_000].join(" and "),
        format!("'x'{}", ".strip()".repeat(10_000)),
        format!("[[0]]{}", "[0]".repeat(10_000)),
    ] {
        let err = eval(&chain).unwrap_err();
        assert!(matches!(err, EvalError::Budget(_)), "got {:?}", err);
    }
}

#[test]
fn test_long_formula_fails_cleanly_during_reduce() {
    let sum = format!("= {}", vec!["1"; 10_000].join("+"));
    let mut pg = ParamGen::new(node(serde_json::json!({"x": sum}))).unwrap();
    let err = pg.reduce_with(None).unwrap_err();
    match err {
        ParamGenError::FormulaEvaluation { source, .. } => {
            assert!(matches!(source, EvalError::Budget(_)), "got {:?}", source)
        }
        other => panic!("expected FormulaEvaluation, got {:?}", other),
    }
}

#[test]
fn test_source_length_limit() {
    let limits = EvalLimits {
        max_source_len: 16,
        ..EvalLimits::default()
    };
    assert!(parser::parse("1 + 2", &limits).is_ok());
    let err = parser::parse("'a rather long string'", &limits).unwrap_err();
    assert!(matches!(err, EvalError::Budget(_)), "got {:?}", err);
}

#[test]
fn test_evaluator_semantics() {
    let cases: &[(&str, Value)] = &[
        ("1 == 1.0", Value::Bool(true)),
        ("'1' == 1", Value::Bool(false)),
        ("True + 1", Value::Int(2)),
        ("0 or 'x'", Value::Str("x".to_string())),
        ("'' and 1", Value::Str(String::new())),
        ("'b' not in 'abc'", Value::Bool(false)),
        ("None is None", Value::Bool(true)),
        ("[1, 2] + [3]", Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ("'hello'[1:3]", Value::Str("el".to_string())),
        ("[x * x for x in range(5) if x % 2 == 0][-1]", Value::Int(16)),
        ("sum([1, 2, 3], 10)", Value::Int(16)),
        ("round(2.5)", Value::Int(2)),
        ("int('42') + int(3.9)", Value::Int(45)),
        ("str(1.0)", Value::Str("1.0".to_string())),
        ("'-'.join(['a', 'b'])", Value::Str("a-b".to_string())),
        ("sorted([3, 1, 2])", Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ("'  pad '.strip()", Value::Str("pad".to_string())),
        ("[1, 2, 1].count(1)", Value::Int(2)),
        ("1 <> 2", Value::Bool(true)),
        ("int(-2.5)", Value::Int(-2)),
        ("1 is 1", Value::Bool(true)),
        ("'a' is 'a'", Value::Bool(true)),
        ("1 is 1.0", Value::Bool(false)),
        ("[1] is [1]", Value::Bool(false)),
        ("True is not 1", Value::Bool(true)),
    ];
    for (source, expected) in cases {
        assert_eq!(&eval(source).unwrap(), expected, "expression {:?}", source);
    }
}

#[test]
fn test_evaluator_errors() {
    assert_eq!(eval("1 // 0").unwrap_err(), EvalError::ZeroDivision);
    assert!(matches!(eval("foo").unwrap_err(), EvalError::UnknownName(_)));
    assert!(matches!(eval("open('x')").unwrap_err(), EvalError::UnknownName(_)));
    assert!(matches!(eval("'a' - 1").unwrap_err(), EvalError::Type(_)));
    assert!(matches!(eval("'a' < 1").unwrap_err(), EvalError::IncomparableTypes { .. }));
    assert!(matches!(eval("[1][3]").unwrap_err(), EvalError::Index(_)));
    assert!(matches!(eval("9223372036854775807 + 1").unwrap_err(), EvalError::Value(_)));
    assert!(matches!(eval("'x'.nope()").unwrap_err(), EvalError::Type(_)));
}

#[test]
fn test_float_to_int_conversions_fail_out_of_range() {
    for source in [
        "int(1e300)",
        "int(-1e19)",
        "int(float('inf'))",
        "int(float('nan'))",
        "round(float('nan'))",
        "round(1e300)",
    ] {
        let err = eval(source).unwrap_err();
        assert!(matches!(err, EvalError::Value(_)), "{:?} gave {:?}", source, err);
    }
    assert_eq!(eval("int(-9.2e18)").unwrap(), Value::Int(-9_200_000_000_000_000_000));
}

#[test]
fn test_strict_mode_equality() {
    let limits = EvalLimits::default();
    let strict = interpreter::eval_str("'a' == 1", &limits, Mode::Strict).unwrap_err();
    assert!(matches!(strict, EvalError::IncomparableTypes { .. }));
    let same_type = interpreter::eval_str("'a' != 'b'", &limits, Mode::Strict).unwrap();
    assert_eq!(same_type, Value::Bool(true));
}

#[test]
fn test_evaluation_budgets() {
    let limits = EvalLimits {
        max_iterations: 100,
        max_sequence_len: 1000,
        ..EvalLimits::default()
    };
    let err = interpreter::eval_str("[i for i in range(500)]", &limits, Mode::Normal).unwrap_err();
    assert!(matches!(err, EvalError::Budget(_)), "got {:?}", err);

    let err = interpreter::eval_str("range(5000)", &limits, Mode::Normal).unwrap_err();
    assert!(matches!(err, EvalError::Budget(_)), "got {:?}", err);

    let err = interpreter::eval_str("'ab' * 1000", &limits, Mode::Normal).unwrap_err();
    assert!(matches!(err, EvalError::Budget(_)), "got {:?}", err);
}

#[test]
fn test_nested_sequences_share_one_budget() {
    let limits = EvalLimits {
        max_iterations: 100,
        max_sequence_len: 100,
        ..EvalLimits::default()
    };
    for source in [
        "[[[0] * 100] * 100] * 100",
        "[[0] * 100 for i in range(100)]",
        "[[0] * 60] + [[0] * 60]",
        "('a' * 50).replace('a', 'bbbbbbbbbb')",
        "('x' * 90).join(['a', 'b', 'c'])",
    ] {
        let err = interpreter::eval_str(source, &limits, Mode::Normal).unwrap_err();
        assert!(matches!(err, EvalError::Budget(_)), "{:?} gave {:?}", source, err);
    }

    let small = interpreter::eval_str("[[0] * 3] * 3", &limits, Mode::Normal).unwrap();
    let row = Value::List(vec![Value::Int(0); 3]);
    assert_eq!(small, Value::List(vec![row; 3]));
}

// ── JSON ────────────────────────────────────────────────────────────

#[test]
fn test_json_round_trip_preserves_order_and_types() {
    let text = r#"{"z":1,"a":{"b":true,"c":2.5},"s":"x","l":[1,"two"],"n":null}"#;
    let tree = json::from_json(text).unwrap();
    assert_eq!(tree.get("n"), Some(&Node::Absent));
    assert_eq!(tree.to_json(), text);
}

#[test]
fn test_json_writes_unrepresentable_floats_as_null() {
    let mut mapping = Mapping::new();
    mapping.insert("nan".to_string(), Node::Scalar(Scalar::Float(f64::NAN)));
    mapping.insert(
        "list".to_string(),
        Node::Scalar(Scalar::List(vec![Scalar::Float(f64::INFINITY), Scalar::Float(0.5)])),
    );
    mapping.insert("gone".to_string(), Node::Absent);
    assert_eq!(
        Node::Mapping(mapping).to_json(),
        r#"{"nan":null,"list":[null,0.5],"gone":null}"#
    );
}

#[test]
fn test_json_pretty() {
    let tree = json::from_json(r#"{"a":{"b":1},"e":{}}"#).unwrap();
    assert_eq!(tree.to_json_pretty(), "{\n  \"a\": {\n    \"b\": 1\n  },\n  \"e\": {}\n}");
}

#[test]
fn test_json_rejects_nested_objects_in_arrays() {
    let err = json::from_json(r#"{"a":[{"b":1}]}"#).unwrap_err();
    assert_eq!(err.code(), "invalid-data");
    let err = json::from_json("{").unwrap_err();
    assert_eq!(err.code(), "invalid-json");
}

// ── Namelist ────────────────────────────────────────────────────────

#[test]
fn test_write_nml_requires_reduce() {
    let pg = ParamGen::new(node(serde_json::json!({"grp": {"a": {"values": "1"}}}))).unwrap();
    assert_eq!(pg.write_nml().unwrap_err().code(), "not-reduced");
}

#[test]
fn test_write_nml() {
    let input = serde_json::json!({
        "ocean_nml": {
            "dt": {"values": {"True": 3600}},
            "grid": {"values": "'tx0.66v1'"},
            "unset": {"values": {"False": 1}},
            "flag": {"values": {"1 < 2": true}}
        },
        "ice_nml": {
            "ndte": {"values": "= 60 * 2"}
        }
    });
    let mut pg = ParamGen::new(node(input)).unwrap();
    pg.reduce_with(None).unwrap();
    let text = pg.write_nml().unwrap();
    assert_eq!(
        text,
        "&ocean_nml\n    dt = 3600\n    grid = 'tx0.66v1'\n    flag = True\n/\n\n&ice_nml\n    ndte = 120\n/\n\n"
    );
}

#[test]
fn test_write_nml_rejects_non_conforming_tree() {
    let tree = node(serde_json::json!({"grp": {"a": 1}}));
    assert_eq!(namelist::write(&tree).unwrap_err().code(), "invalid-data");
}

#[test]
fn test_parse_nml() {
    let text = "\
! leading comment
loose = 1
&ocean_nml
    dt = 3600 ! seconds
    grid = 'tx0.66v1!'
    layers = 1, 2,
             3, 4
/
&empty_nml
/
";
    let tree = namelist::parse(text).unwrap();
    let expected = node(serde_json::json!({
        "no_group": {"loose": {"values": "1"}},
        "ocean_nml": {
            "dt": {"values": "3600"},
            "grid": {"values": "'tx0.66v1!'"},
            "layers": {"values": "1, 2,\n3, 4"}
        }
    }));
    assert_eq!(tree, expected, "got {}", tree.to_json_pretty());
}

#[test]
fn test_parse_nml_errors() {
    let cases = [
        ("&a\n&b\n/\n", 2),
        ("/\n", 1),
        ("&a\n  x = 1\n  stray\n/\n", 3),
        ("&a\n  x = y = 1\n/\n", 2),
        ("&bad group\n/\n", 1),
    ];
    for (text, line) in cases {
        match namelist::parse(text) {
            Err(ParamGenError::Namelist { line: got, .. }) => {
                assert_eq!(got, line, "wrong line for {:?}", text)
            }
            other => panic!("expected namelist error for {:?}, got {:?}", text, other),
        }
    }
}

#[test]
fn test_nml_write_then_parse() {
    let mut pg = ParamGen::from_nml("&grp\n  a = 1\n  b = 'x'\n/\n").unwrap();
    pg.reduce_with(None).unwrap();
    let text = pg.write_nml().unwrap();
    let reparsed = namelist::parse(&text).unwrap();
    assert_eq!(&reparsed, pg.data());
}

// ── Validation ──────────────────────────────────────────────────────

#[test]
fn test_validate_guards() {
    let tree = node(serde_json::json!({
        "ok": {"True": 1, "else": 2},
        "mixed": {"inner": {"1 < 2": "a", "plain": "b"}},
        "bad_formula": "= (1 +",
        "bad_guard": {"1 / 0 == 0": 1},
        "deferred": {"$X == 1": 1, "plain": 2}
    }));
    let errors = validate::validate_guards(&tree);
    let found: Vec<(&str, Vec<String>)> = errors.iter().map(|e| (e.code, e.path.clone())).collect();
    assert_eq!(
        found,
        vec![
            ("ambiguous-guard-mix", vec!["mixed".to_string(), "inner".to_string()]),
            ("formula-syntax", vec!["bad_formula".to_string()]),
            ("guard-evaluation", vec!["bad_guard".to_string()]),
        ]
    );

    let pg = ParamGen::new(tree).unwrap();
    assert_eq!(pg.validate(), errors);
    assert!(json::validation_errors_to_json(&errors).starts_with(r#"[{"code":"ambiguous-guard-mix""#));
}
