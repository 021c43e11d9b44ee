//! Native functions callable from every script.

use skript_lang::value::Value;
use skript_lang::{NativeFunction, Parameter, RegistryBuilder, RuntimeResult, Signature};

fn number_arg(args: &[Vec<Value>]) -> f64 {
    args.first()
        .and_then(|values| values.first())
        .map_or(0.0, Value::as_number)
}

fn unary(name: &str, f: fn(f64) -> f64) -> NativeFunction {
    let signature = Signature::new(
        name,
        vec![Parameter::new("n", "number", true)],
        Some(("number", true)),
    );
    NativeFunction::new(signature, move |args| Ok(vec![Value::Number(f(number_arg(args)))]))
}

/// The smallest or largest of any number of numbers. Empty input returns
/// nothing.
fn extremum(name: &str, pick_max: bool) -> NativeFunction {
    let signature = Signature::new(
        name,
        vec![Parameter::new("ns", "number", false)],
        Some(("number", true)),
    );
    NativeFunction::new(signature, move |args| -> RuntimeResult<Vec<Value>> {
        let numbers = args.first().into_iter().flatten().map(Value::as_number);
        let best = numbers.reduce(|a, b| if pick_max { a.max(b) } else { a.min(b) });
        Ok(best.map(Value::Number).into_iter().collect())
    })
}

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .function(unary("abs", f64::abs))
        .function(unary("floor", f64::floor))
        .function(unary("ceil", f64::ceil))
        .function(unary("round", f64::round))
        .function(unary("sqrt", f64::sqrt))
        .function(extremum("min", false))
        .function(extremum("max", true));
}

#[cfg(test)]
mod tests {
    use crate::testing::Harness;

    #[test]
    fn test_natives() {
        let harness = Harness::new();
        harness.run(
            "\
on load:
    broadcast abs(-3)
    broadcast floor(2.7) and ceil(2.2)
    broadcast round(2.5)
    broadcast sqrt(16)
    broadcast min(4, 2, 8) and max(4, 2, 8)
",
            "load",
        );
        assert_eq!(harness.messages(), ["3", "2", "3", "3", "4", "2", "8"]);
    }
}
