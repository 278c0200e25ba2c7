//! Expression parser for spreadsheet formulas.
//!
//! This module implements a recursive descent parser for the arithmetic
//! formula language: binary `+ - * /`, unary signs, parentheses, decimal
//! literals, and positional cell references.
//!
//! # BNF Grammar
//!
//! ```bnf
//! Expression     ::= Addition
//! Addition       ::= Multiplication ( ( "+" | "-" ) Multiplication )*
//! Multiplication ::= Unary ( ( "*" | "/" ) Unary )*
//! Unary          ::= ( "+" | "-" ) Unary | Primary
//! Primary        ::= Number | CellRef | "(" Expression ")"
//! CellRef        ::= [A-Z]+ [0-9]+
//! Number         ::= [0-9]+ ( "." [0-9]* )?
//! ```
//!
//! Whitespace is permitted between tokens but not inside a number or a cell
//! reference. A reference whose position lies beyond the sheet limits still
//! parses; it carries the invalid-position sentinel and evaluates to a
//! reference error. The parsed tree prints back to a canonical form with
//! the minimum parentheses required by operator precedence.

use super::models::{FormulaError, Position};

/// Represents a token in the expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    CellRef(Position),

    // Operators
    Plus,
    Minus,
    Multiply,
    Divide,

    // Delimiters
    LeftParen,
    RightParen,

    // End of input
    Eof,
}

/// Represents an Abstract Syntax Tree node for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    Number(f64),
    CellRef(Position),

    // Binary operations
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },

    // Unary operations
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

impl Expr {
    /// Evaluates the expression against a numeric cell lookup.
    ///
    /// The lookup maps a position to its numeric value, failing with a
    /// [`FormulaError`] when the target cell is not numerically
    /// interpretable. Division by a zero divisor and any non-finite
    /// intermediate result yield [`FormulaError::Div0`], so a successful
    /// evaluation is always a finite double.
    pub fn evaluate<F>(&self, lookup: &mut F) -> Result<f64, FormulaError>
    where
        F: FnMut(Position) -> Result<f64, FormulaError>,
    {
        match self {
            Expr::Number(value) => Ok(*value),

            Expr::CellRef(position) => {
                if !position.is_valid() {
                    return Err(FormulaError::Ref);
                }
                lookup(*position)
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left_value = left.evaluate(lookup)?;
                let right_value = right.evaluate(lookup)?;

                let result = match operator {
                    BinaryOp::Add => left_value + right_value,
                    BinaryOp::Subtract => left_value - right_value,
                    BinaryOp::Multiply => left_value * right_value,
                    BinaryOp::Divide => {
                        if right_value == 0.0 {
                            return Err(FormulaError::Div0);
                        }
                        left_value / right_value
                    }
                };

                if result.is_finite() {
                    Ok(result)
                } else {
                    Err(FormulaError::Div0)
                }
            }

            Expr::Unary { operator, operand } => {
                let operand_value = operand.evaluate(lookup)?;

                match operator {
                    UnaryOp::Plus => Ok(operand_value),
                    UnaryOp::Minus => Ok(-operand_value),
                }
            }
        }
    }

    /// Collects the referenced positions in traversal order.
    ///
    /// Duplicates are kept, and so are invalid-position sentinels from
    /// out-of-range references; callers that need the distinct valid set
    /// sort, deduplicate, and filter on top of this.
    pub fn referenced_positions(&self) -> Vec<Position> {
        let mut positions = Vec::new();
        self.collect_positions(&mut positions);
        positions
    }

    fn collect_positions(&self, positions: &mut Vec<Position>) {
        match self {
            Expr::Number(_) => {}
            Expr::CellRef(position) => positions.push(*position),
            Expr::Binary { left, right, .. } => {
                left.collect_positions(positions);
                right.collect_positions(positions);
            }
            Expr::Unary { operand, .. } => operand.collect_positions(positions),
        }
    }

    /// Binding strength used to decide where parentheses are required.
    fn precedence(&self) -> u8 {
        match self {
            Expr::Number(_) | Expr::CellRef(_) => 4,
            Expr::Unary { .. } => 3,
            Expr::Binary {
                operator: BinaryOp::Multiply | BinaryOp::Divide,
                ..
            } => 2,
            Expr::Binary {
                operator: BinaryOp::Add | BinaryOp::Subtract,
                ..
            } => 1,
        }
    }
}

impl std::fmt::Display for Expr {
    /// Pretty-prints the expression with minimal parentheses.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number(value) => write!(f, "{}", value),

            Expr::CellRef(position) => {
                if position.is_valid() {
                    write!(f, "{}", position)
                } else {
                    write!(f, "{}", FormulaError::Ref)
                }
            }

            Expr::Unary { operator, operand } => {
                let sign = match operator {
                    UnaryOp::Plus => '+',
                    UnaryOp::Minus => '-',
                };
                if operand.precedence() < self.precedence() {
                    write!(f, "{}({})", sign, operand)
                } else {
                    write!(f, "{}{}", sign, operand)
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let own = self.precedence();

                if left.precedence() < own {
                    write!(f, "({})", left)?;
                } else {
                    write!(f, "{}", left)?;
                }

                let sign = match operator {
                    BinaryOp::Add => '+',
                    BinaryOp::Subtract => '-',
                    BinaryOp::Multiply => '*',
                    BinaryOp::Divide => '/',
                };
                write!(f, "{}", sign)?;

                // Subtraction and division are left-associative, so an
                // equally strong right operand changes grouping without
                // parentheses.
                let grouped = right.precedence() < own
                    || (right.precedence() == own
                        && matches!(operator, BinaryOp::Subtract | BinaryOp::Divide));
                if grouped {
                    write!(f, "({})", right)
                } else {
                    write!(f, "{}", right)
                }
            }
        }
    }
}

/// Lexical analyzer for tokenizing expressions.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    /// Creates a new lexer for the given input string.
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
        }
    }

    /// Advances to the next character in the input.
    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    /// Skips whitespace characters.
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Reads a number token (integer or decimal).
    fn read_number(&mut self) -> Result<f64, String> {
        let mut number_str = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                number_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if self.current_char == Some('.') {
            number_str.push('.');
            self.advance();

            while let Some(ch) = self.current_char {
                if ch.is_ascii_digit() {
                    number_str.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        match number_str.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(format!("Invalid number: {}", number_str)),
        }
    }

    /// Reads a cell reference (letters followed by digits).
    fn read_cell_reference(&mut self) -> Result<Position, String> {
        let mut reference = String::new();
        let mut seen_digit = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_alphabetic() {
                if seen_digit {
                    return Err(format!("Invalid cell reference: {}{}", reference, ch));
                }
                reference.push(ch.to_ascii_uppercase());
                self.advance();
            } else if ch.is_ascii_digit() {
                seen_digit = true;
                reference.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if !seen_digit {
            return Err(format!("Invalid cell reference: {}", reference));
        }

        // Out-of-range references keep the invalid sentinel and surface as
        // a reference error at evaluation, not as a parse failure.
        Ok(Position::parse(&reference))
    }

    /// Gets the next token from the input.
    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace();

        match self.current_char {
            None => Ok(Token::Eof),

            Some(ch) => match ch {
                '0'..='9' => {
                    let number = self.read_number()?;
                    Ok(Token::Number(number))
                }

                'A'..='Z' | 'a'..='z' => {
                    let position = self.read_cell_reference()?;
                    Ok(Token::CellRef(position))
                }

                '+' => {
                    self.advance();
                    Ok(Token::Plus)
                }

                '-' => {
                    self.advance();
                    Ok(Token::Minus)
                }

                '*' => {
                    self.advance();
                    Ok(Token::Multiply)
                }

                '/' => {
                    self.advance();
                    Ok(Token::Divide)
                }

                '(' => {
                    self.advance();
                    Ok(Token::LeftParen)
                }

                ')' => {
                    self.advance();
                    Ok(Token::RightParen)
                }

                _ => Err(format!("Unexpected character: '{}'", ch)),
            },
        }
    }
}

/// Recursive descent parser for formula expressions.
pub struct Parser {
    lexer: Lexer,
    current_token: Token,
}

impl Parser {
    /// Creates a new parser for the given expression.
    pub fn new(input: &str) -> Result<Self, String> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;

        Ok(Self {
            lexer,
            current_token,
        })
    }

    /// Advances to the next token.
    fn advance(&mut self) -> Result<(), String> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    /// Checks that the current token matches the expected token and advances.
    fn expect(&mut self, expected: Token) -> Result<(), String> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance()
        } else {
            Err(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            ))
        }
    }

    /// Parses the top-level expression.
    pub fn parse(&mut self) -> Result<Expr, String> {
        let expr = self.parse_addition()?;

        if self.current_token != Token::Eof {
            return Err(format!("Unexpected token at end: {:?}", self.current_token));
        }

        Ok(expr)
    }

    /// Parses addition and subtraction expressions.
    fn parse_addition(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplication()?;

        while matches!(self.current_token, Token::Plus | Token::Minus) {
            let op = match self.current_token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_multiplication()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses multiplication and division expressions.
    fn parse_multiplication(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while matches!(self.current_token, Token::Multiply | Token::Divide) {
            let op = match self.current_token {
                Token::Multiply => BinaryOp::Multiply,
                Token::Divide => BinaryOp::Divide,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses unary expressions.
    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.current_token {
            Token::Plus => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    operator: UnaryOp::Plus,
                    operand: Box::new(operand),
                })
            }
            Token::Minus => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    operator: UnaryOp::Minus,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_primary(),
        }
    }

    /// Parses primary expressions (highest precedence).
    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.current_token {
            Token::Number(value) => {
                self.advance()?;
                Ok(Expr::Number(value))
            }

            Token::CellRef(position) => {
                self.advance()?;
                Ok(Expr::CellRef(position))
            }

            Token::LeftParen => {
                self.advance()?;
                let expr = self.parse_addition()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }

            _ => Err(format!("Unexpected token: {:?}", self.current_token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(input: &str) -> Expr {
        let mut parser = Parser::new(input).unwrap();
        parser.parse().unwrap()
    }

    fn parse_err(input: &str) -> String {
        Parser::new(input)
            .and_then(|mut parser| parser.parse())
            .unwrap_err()
    }

    fn eval_with(expr: &Expr, cells: &[(&str, f64)]) -> Result<f64, FormulaError> {
        let table: HashMap<Position, f64> = cells
            .iter()
            .map(|&(name, value)| (Position::parse(name), value))
            .collect();
        expr.evaluate(&mut |position| Ok(table.get(&position).copied().unwrap_or(0.0)))
    }

    #[test]
    fn test_lexer_numbers() {
        let mut lexer = Lexer::new("42 3.14 0.5");

        assert_eq!(lexer.next_token().unwrap(), Token::Number(42.0));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(3.14));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(0.5));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_operators_and_delimiters() {
        let mut lexer = Lexer::new("+ - * / ( )");

        assert_eq!(lexer.next_token().unwrap(), Token::Plus);
        assert_eq!(lexer.next_token().unwrap(), Token::Minus);
        assert_eq!(lexer.next_token().unwrap(), Token::Multiply);
        assert_eq!(lexer.next_token().unwrap(), Token::Divide);
        assert_eq!(lexer.next_token().unwrap(), Token::LeftParen);
        assert_eq!(lexer.next_token().unwrap(), Token::RightParen);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_cell_references() {
        let mut lexer = Lexer::new("A1 zz9999 AA27");

        assert_eq!(
            lexer.next_token().unwrap(),
            Token::CellRef(Position::parse("A1"))
        );
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::CellRef(Position::parse("ZZ9999"))
        );
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::CellRef(Position::parse("AA27"))
        );
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_out_of_range_reference_is_invalid_sentinel() {
        let mut lexer = Lexer::new("A99999999");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::CellRef(Position::INVALID)
        );
    }

    #[test]
    fn test_lexer_rejects_malformed_input() {
        assert!(Lexer::new("AB").next_token().is_err());
        assert!(Lexer::new("A1B").next_token().is_err());
        assert!(Lexer::new("#").next_token().is_err());
        assert!(Lexer::new("_x").next_token().is_err());
    }

    #[test]
    fn test_parser_literals() {
        assert_eq!(parse("42"), Expr::Number(42.0));
        assert_eq!(parse("3.14"), Expr::Number(3.14));
        assert_eq!(parse("B2"), Expr::CellRef(Position::parse("B2")));
    }

    #[test]
    fn test_parser_operator_precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4)
        let expr = parse("2 + 3 * 4");
        match expr {
            Expr::Binary {
                left,
                operator: BinaryOp::Add,
                right,
            } => {
                assert_eq!(*left, Expr::Number(2.0));
                assert!(matches!(
                    *right,
                    Expr::Binary {
                        operator: BinaryOp::Multiply,
                        ..
                    }
                ));
            }
            _ => panic!("Expected addition at top level"),
        }
    }

    #[test]
    fn test_parser_left_associativity() {
        // 1 - 2 - 3 parses as (1 - 2) - 3
        let expr = parse("1-2-3");
        match expr {
            Expr::Binary {
                left,
                operator: BinaryOp::Subtract,
                right,
            } => {
                assert!(matches!(
                    *left,
                    Expr::Binary {
                        operator: BinaryOp::Subtract,
                        ..
                    }
                ));
                assert_eq!(*right, Expr::Number(3.0));
            }
            _ => panic!("Expected subtraction at top level"),
        }
    }

    #[test]
    fn test_parser_parentheses() {
        let expr = parse("(2 + 3) * 4");
        match expr {
            Expr::Binary {
                left,
                operator: BinaryOp::Multiply,
                right,
            } => {
                assert!(matches!(
                    *left,
                    Expr::Binary {
                        operator: BinaryOp::Add,
                        ..
                    }
                ));
                assert_eq!(*right, Expr::Number(4.0));
            }
            _ => panic!("Expected multiplication at top level"),
        }
    }

    #[test]
    fn test_parser_unary_chains() {
        let expr = parse("--1");
        match expr {
            Expr::Unary {
                operator: UnaryOp::Minus,
                operand,
            } => {
                assert!(matches!(
                    *operand,
                    Expr::Unary {
                        operator: UnaryOp::Minus,
                        ..
                    }
                ));
            }
            _ => panic!("Expected nested unary expression"),
        }

        assert_eq!(eval_with(&parse("-+-2"), &[]), Ok(2.0));
    }

    #[test]
    fn test_parser_rejects_malformed_expressions() {
        parse_err("");
        parse_err("1 +");
        parse_err("(1");
        parse_err("1)");
        parse_err("* 2");
        parse_err("1 2");
        parse_err("A1 B1");
        parse_err("SUM(A1)");
    }

    #[test]
    fn test_referenced_positions_traversal_order_with_duplicates() {
        let expr = parse("A1+B2*A1");
        assert_eq!(
            expr.referenced_positions(),
            vec![
                Position::parse("A1"),
                Position::parse("B2"),
                Position::parse("A1"),
            ]
        );
    }

    #[test]
    fn test_evaluate_arithmetic() {
        assert_eq!(eval_with(&parse("2+3*4"), &[]), Ok(14.0));
        assert_eq!(eval_with(&parse("(2+3)*4"), &[]), Ok(20.0));
        assert_eq!(eval_with(&parse("10/4"), &[]), Ok(2.5));
        assert_eq!(eval_with(&parse("-3+1"), &[]), Ok(-2.0));
    }

    #[test]
    fn test_evaluate_cell_references() {
        let expr = parse("A1+B1*2");
        assert_eq!(eval_with(&expr, &[("A1", 10.0), ("B1", 4.0)]), Ok(18.0));

        // Missing cells contribute zero through the lookup.
        assert_eq!(eval_with(&expr, &[("A1", 10.0)]), Ok(10.0));
    }

    #[test]
    fn test_evaluate_division_by_zero() {
        assert_eq!(eval_with(&parse("1/0"), &[]), Err(FormulaError::Div0));
        assert_eq!(eval_with(&parse("0/0"), &[]), Err(FormulaError::Div0));
        assert_eq!(
            eval_with(&parse("1/A1"), &[("A1", 0.0)]),
            Err(FormulaError::Div0)
        );
    }

    #[test]
    fn test_evaluate_promotes_non_finite_results() {
        let expr = Expr::Binary {
            left: Box::new(Expr::Number(1e308)),
            operator: BinaryOp::Multiply,
            right: Box::new(Expr::Number(1e308)),
        };
        assert_eq!(expr.evaluate(&mut |_| Ok(0.0)), Err(FormulaError::Div0));
    }

    #[test]
    fn test_evaluate_invalid_reference() {
        let expr = parse("A0+1");
        assert_eq!(eval_with(&expr, &[]), Err(FormulaError::Ref));
    }

    #[test]
    fn test_evaluate_propagates_lookup_errors() {
        let expr = parse("A1+1");
        let result = expr.evaluate(&mut |_| Err(FormulaError::Value));
        assert_eq!(result, Err(FormulaError::Value));
    }

    #[test]
    fn test_display_minimal_parentheses() {
        assert_eq!(parse("2+3*4").to_string(), "2+3*4");
        assert_eq!(parse("(2+3)*4").to_string(), "(2+3)*4");
        assert_eq!(parse("2*(3+4)").to_string(), "2*(3+4)");
        assert_eq!(parse("1-(2-3)").to_string(), "1-(2-3)");
        assert_eq!(parse("1-(2*3)").to_string(), "1-2*3");
        assert_eq!(parse("4/(2*2)").to_string(), "4/(2*2)");
        assert_eq!(parse("(1-2)+3").to_string(), "1-2+3");
        assert_eq!(parse("-(2*3)").to_string(), "-(2*3)");
        assert_eq!(parse("-(1+2)").to_string(), "-(1+2)");
        assert_eq!(parse("--1").to_string(), "--1");
        assert_eq!(parse("2*-3").to_string(), "2*-3");
    }

    #[test]
    fn test_display_normalizes_whitespace_and_case() {
        assert_eq!(parse(" a1 +  2 ").to_string(), "A1+2");
        assert_eq!(parse("( zz99 )").to_string(), "ZZ99");
    }

    #[test]
    fn test_display_invalid_reference() {
        assert_eq!(parse("A99999999+1").to_string(), "#REF!+1");
    }

    #[test]
    fn test_display_is_stable_under_reparse() {
        for input in ["2+3*4", "(2+3)*4", "1-(2-3)", "-(A1+B2)/4", "2*6/3"] {
            let canonical = parse(input).to_string();
            assert_eq!(parse(&canonical).to_string(), canonical);
        }
    }
}
