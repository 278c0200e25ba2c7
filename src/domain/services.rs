//! Formula services for the calculation engine.
//!
//! This module wraps a parsed expression tree into the [`Formula`] value a
//! cell owns, and provides the numeric reinterpretation applied to text
//! cells during evaluation.

use std::sync::OnceLock;

use regex::Regex;

use super::models::{FormulaError, Position};
use super::parser::{Expr, Parser};

/// A parsed, immutable formula.
///
/// A formula owns its expression tree, the canonical text of that tree, and
/// the distinct referenced positions. The canonical text is stable: parsing
/// it again produces a tree that prints identically.
///
/// # Examples
///
/// ```
/// use gridcalc::domain::{Formula, Position};
///
/// let formula = Formula::parse("b1 + 2*( A1 + 1)").unwrap();
/// assert_eq!(formula.expression(), "B1+2*(A1+1)");
/// assert_eq!(
///     formula.referenced_cells(),
///     &[Position::parse("A1"), Position::parse("B1")],
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expression: String,
    ast: Expr,
    referenced_cells: Vec<Position>,
}

impl Formula {
    /// Parses an expression string into a formula.
    ///
    /// Returns the parser's message when the input does not match the
    /// formula grammar. References beyond the sheet limits parse fine and
    /// evaluate to a reference error.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let mut parser = Parser::new(expression)?;
        let ast = parser.parse()?;

        let mut referenced_cells: Vec<Position> = ast
            .referenced_positions()
            .into_iter()
            .filter(|position| position.is_valid())
            .collect();
        referenced_cells.sort();
        referenced_cells.dedup();

        Ok(Self {
            expression: ast.to_string(),
            ast,
            referenced_cells,
        })
    }

    /// Returns the canonical expression text (without the formula sign).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the expression tree.
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Returns the distinct referenced positions, sorted ascending.
    pub fn referenced_cells(&self) -> &[Position] {
        &self.referenced_cells
    }
}

/// Regex gating which text values count as numbers during evaluation.
fn numeric_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?$").expect("numeric pattern must compile")
    })
}

/// Reinterprets the displayed text of a cell as a number.
///
/// Text feeding a formula must be a plain decimal: an optional minus sign,
/// an integer part without leading zeros, and an optional fraction. Anything
/// else (including values that overflow a finite double) fails with
/// [`FormulaError::Value`].
///
/// # Examples
///
/// ```
/// use gridcalc::domain::{numeric_text_value, FormulaError};
///
/// assert_eq!(numeric_text_value("123"), Ok(123.0));
/// assert_eq!(numeric_text_value("-4.5"), Ok(-4.5));
/// assert_eq!(numeric_text_value("hello"), Err(FormulaError::Value));
/// ```
pub fn numeric_text_value(text: &str) -> Result<f64, FormulaError> {
    if !numeric_pattern().is_match(text) {
        return Err(FormulaError::Value);
    }

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(FormulaError::Value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_canonical_expression() {
        assert_eq!(Formula::parse("2 + 2").unwrap().expression(), "2+2");
        assert_eq!(Formula::parse("(1+2)*3").unwrap().expression(), "(1+2)*3");
        assert_eq!(Formula::parse("1+(2*3)").unwrap().expression(), "1+2*3");
        assert_eq!(Formula::parse("a1/b2").unwrap().expression(), "A1/B2");
    }

    #[test]
    fn test_formula_referenced_cells_sorted_and_deduplicated() {
        let formula = Formula::parse("B2+A1*B2+A10").unwrap();
        assert_eq!(
            formula.referenced_cells(),
            &[
                Position::parse("A1"),
                Position::parse("B2"),
                Position::parse("A10"),
            ]
        );
    }

    #[test]
    fn test_formula_without_references() {
        let formula = Formula::parse("1+2*3").unwrap();
        assert!(formula.referenced_cells().is_empty());
    }

    #[test]
    fn test_formula_out_of_range_reference() {
        // Beyond the sheet limits: not a graph node, evaluates to #REF!.
        let formula = Formula::parse("XFE1+1").unwrap();
        assert!(formula.referenced_cells().is_empty());
        assert_eq!(formula.expression(), "#REF!+1");
        assert_eq!(
            formula.ast().evaluate(&mut |_| Ok(0.0)),
            Err(FormulaError::Ref)
        );
    }

    #[test]
    fn test_formula_parse_failure() {
        assert!(Formula::parse("").is_err());
        assert!(Formula::parse("1+").is_err());
        assert!(Formula::parse("SUM(A1:A3)").is_err());
        assert!(Formula::parse("1 2").is_err());
    }

    #[test]
    fn test_numeric_text_value_accepts_plain_decimals() {
        assert_eq!(numeric_text_value("0"), Ok(0.0));
        assert_eq!(numeric_text_value("123"), Ok(123.0));
        assert_eq!(numeric_text_value("-7"), Ok(-7.0));
        assert_eq!(numeric_text_value("3.25"), Ok(3.25));
        assert_eq!(numeric_text_value("-0.5"), Ok(-0.5));
    }

    #[test]
    fn test_numeric_text_value_rejects_everything_else() {
        for text in [
            "", " 12", "12 ", "007", "1.", ".5", "1e5", "--1", "+1", "1,000", "abc", "12x",
        ] {
            assert_eq!(numeric_text_value(text), Err(FormulaError::Value), "{:?}", text);
        }
    }

    #[test]
    fn test_numeric_text_value_rejects_overflow() {
        let huge = "9".repeat(400);
        assert_eq!(numeric_text_value(&huge), Err(FormulaError::Value));
    }
}
