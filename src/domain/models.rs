//! Domain models for the spreadsheet calculation engine.
//!
//! This module contains the core data structures: cell positions, cell
//! values and contents, and the sheet itself with its embedded dependency
//! graph and result cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io;

use super::errors::{DomainError, DomainResult};
use super::services::{numeric_text_value, Formula};

/// Prefix marking a cell text as a formula (only with at least one
/// character after it).
pub const FORMULA_SIGN: char = '=';

/// Prefix forcing literal display of a cell text.
pub const ESCAPE_SIGN: char = '\'';

/// A cell coordinate: zero-based row and column indices.
///
/// Positions have a textual form with an upper-case bijective base-26
/// column followed by a 1-based row number. Parsing that form is total:
/// malformed or out-of-range input yields [`Position::INVALID`] rather
/// than an error.
///
/// # Examples
///
/// ```
/// use gridcalc::domain::Position;
///
/// assert_eq!(Position::parse("A1"), Position::new(0, 0));
/// assert_eq!(Position::parse("AA27"), Position::new(26, 26));
/// assert_eq!(Position::new(0, 0).to_string(), "A1");
///
/// assert!(!Position::parse("").is_valid());
/// assert!(!Position::parse("1A").is_valid());
/// assert!(!Position::parse("A0").is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub row: i32,
    pub col: i32,
}

impl Position {
    /// Maximum number of rows a sheet can address.
    pub const MAX_ROWS: i32 = 16_384;

    /// Maximum number of columns a sheet can address.
    pub const MAX_COLS: i32 = 16_384;

    /// Sentinel for an unparseable or out-of-range position.
    pub const INVALID: Position = Position { row: -1, col: -1 };

    /// Creates a position from raw indices.
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Checks that both indices lie inside the addressable sheet area.
    pub fn is_valid(&self) -> bool {
        self.row >= 0 && self.row < Self::MAX_ROWS && self.col >= 0 && self.col < Self::MAX_COLS
    }

    /// Parses the textual form ("A1", "AA27") into a position.
    ///
    /// Parsing is total: anything that is not upper-case column letters
    /// followed by a 1-based row number inside the sheet limits yields
    /// [`Position::INVALID`].
    pub fn parse(text: &str) -> Position {
        let mut column = 0i64;
        let mut letters = 0usize;
        let mut chars = text.chars().peekable();

        while let Some(&ch) = chars.peek() {
            if !ch.is_ascii_uppercase() {
                break;
            }
            chars.next();
            letters += 1;
            column = column * 26 + (ch as i64 - 'A' as i64 + 1);
            if column > Self::MAX_COLS as i64 {
                return Position::INVALID;
            }
        }
        if letters == 0 {
            return Position::INVALID;
        }

        let digits: String = chars.collect();
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Position::INVALID;
        }
        let row = match digits.parse::<i64>() {
            Ok(number) if number >= 1 && number <= Self::MAX_ROWS as i64 => number - 1,
            _ => return Position::INVALID,
        };

        Position {
            row: row as i32,
            col: (column - 1) as i32,
        }
    }

    /// Converts a zero-based column index to its letter label.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridcalc::domain::Position;
    ///
    /// assert_eq!(Position::column_label(0), "A");
    /// assert_eq!(Position::column_label(25), "Z");
    /// assert_eq!(Position::column_label(26), "AA");
    /// ```
    pub fn column_label(col: i32) -> String {
        let mut result = String::new();
        let mut c = col;
        loop {
            result = char::from(b'A' + (c % 26) as u8).to_string() + &result;
            if c < 26 {
                break;
            }
            c = c / 26 - 1;
        }
        result
    }
}

impl fmt::Display for Position {
    /// Renders the textual form; the invalid sentinel renders as nothing.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return Ok(());
        }
        write!(f, "{}{}", Self::column_label(self.col), self.row + 1)
    }
}

/// A rectangular extent in rows and columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Size {
    pub rows: i32,
    pub cols: i32,
}

/// A value-level evaluation failure. Not an error type: formula cells hold
/// these as legitimate results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaError {
    /// A formula references a syntactically invalid position.
    Ref,
    /// A referenced cell holds text that is not numerically interpretable.
    Value,
    /// Division by zero, or a non-finite arithmetic result.
    Div0,
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaError::Ref => write!(f, "#REF!"),
            FormulaError::Value => write!(f, "#VALUE!"),
            FormulaError::Div0 => write!(f, "#DIV/0!"),
        }
    }
}

/// The user-visible result of reading a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Error(FormulaError),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(text) => write!(f, "{}", text),
            CellValue::Number(number) => write!(f, "{}", number),
            CellValue::Error(error) => write!(f, "{}", error),
        }
    }
}

/// What a cell holds: nothing, a text string, or a parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Empty,
    Text(String),
    Formula(Formula),
}

/// A single sheet slot: its content plus the cached result of the last
/// formula evaluation. Only finite doubles are ever cached; errors are
/// recomputed on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    content: CellContent,
    cache: Option<f64>,
}

impl Cell {
    fn empty() -> Self {
        Self {
            content: CellContent::Empty,
            cache: None,
        }
    }

    fn with_content(content: CellContent) -> Self {
        Self {
            content,
            cache: None,
        }
    }

    /// Returns the cell's content.
    pub fn content(&self) -> &CellContent {
        &self.content
    }

    /// Checks whether the cell holds nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self.content, CellContent::Empty)
    }

    /// Returns the raw text of the cell: the empty string for Empty, the
    /// stored text (escape sign preserved) for Text, and the formula sign
    /// followed by the canonical expression for Formula.
    pub fn text(&self) -> String {
        match &self.content {
            CellContent::Empty => String::new(),
            CellContent::Text(text) => text.clone(),
            CellContent::Formula(formula) => format!("{}{}", FORMULA_SIGN, formula.expression()),
        }
    }

    /// Returns the distinct positions the cell's formula reads from, sorted
    /// ascending; empty for non-formula cells.
    pub fn referenced_cells(&self) -> &[Position] {
        match &self.content {
            CellContent::Formula(formula) => formula.referenced_cells(),
            _ => &[],
        }
    }

    /// Returns the cached evaluation result, if populated.
    pub fn cached_value(&self) -> Option<f64> {
        self.cache
    }

    fn invalidate_cache(&mut self) -> bool {
        self.cache.take().is_some()
    }
}

/// Strips the escape sign from a text for display.
fn display_text(text: &str) -> &str {
    text.strip_prefix(ESCAPE_SIGN).unwrap_or(text)
}

fn position_description(position: Position) -> String {
    format!("({}, {})", position.row, position.col)
}

/// The sheet: a sparse grid of cells with an embedded dependency graph.
///
/// Cells are stored in a hash map keyed by position; dependency edges are
/// stored as position sets in both directions, so the graph never holds
/// references into the cell storage. Edits keep the graph acyclic and both
/// edge maps reciprocal, and invalidate cached formula results along the
/// dependent closure. Reads are lazy and memoized.
///
/// # Examples
///
/// ```
/// use gridcalc::domain::{CellValue, Position, Spreadsheet};
///
/// let mut sheet = Spreadsheet::new();
/// sheet.set_cell(Position::parse("A1"), "2").unwrap();
/// sheet.set_cell(Position::parse("A2"), "=A1+3").unwrap();
/// assert_eq!(
///     sheet.value(Position::parse("A2")).unwrap(),
///     CellValue::Number(5.0),
/// );
///
/// sheet.set_cell(Position::parse("A1"), "7").unwrap();
/// assert_eq!(
///     sheet.value(Position::parse("A2")).unwrap(),
///     CellValue::Number(10.0),
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct Spreadsheet {
    /// Cell storage, sparse: only written or referenced positions exist.
    cells: HashMap<Position, Cell>,
    /// Out-edges: cell -> cells its formula reads from.
    dependencies: HashMap<Position, HashSet<Position>>,
    /// In-edges: cell -> cells whose formulas read from it.
    dependents: HashMap<Position, HashSet<Position>>,
}

impl Spreadsheet {
    /// Creates an empty sheet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the text of the cell at `position`.
    ///
    /// Text starting with the formula sign (and at least one more
    /// character) is parsed as a formula; the empty string empties the
    /// cell; anything else is stored as text. A formula's referenced cells
    /// are materialized as empty slots when absent, the dependency edges
    /// are rewired, and every dependent's cached result is invalidated.
    ///
    /// # Errors
    ///
    /// * [`DomainError::InvalidPosition`] when `position` is invalid.
    /// * [`DomainError::InvalidFormula`] when formula parsing fails.
    /// * [`DomainError::CircularReference`] when the new formula would
    ///   close a cycle.
    ///
    /// A failed call leaves the sheet exactly as it was.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridcalc::domain::{DomainError, Position, Spreadsheet};
    ///
    /// let mut sheet = Spreadsheet::new();
    /// sheet.set_cell(Position::parse("A1"), "=B1").unwrap();
    /// assert_eq!(
    ///     sheet.set_cell(Position::parse("B1"), "=A1"),
    ///     Err(DomainError::CircularReference),
    /// );
    /// ```
    pub fn set_cell(&mut self, position: Position, text: &str) -> DomainResult<()> {
        if !position.is_valid() {
            return Err(DomainError::InvalidPosition(position_description(position)));
        }

        let content = if text.len() > 1 && text.starts_with(FORMULA_SIGN) {
            let formula = Formula::parse(&text[1..]).map_err(DomainError::InvalidFormula)?;
            CellContent::Formula(formula)
        } else if text.is_empty() {
            CellContent::Empty
        } else {
            CellContent::Text(text.to_string())
        };

        if let CellContent::Formula(ref formula) = content {
            if self.creates_cycle(position, formula.referenced_cells()) {
                return Err(DomainError::CircularReference);
            }
        }

        let references: Vec<Position> = match &content {
            CellContent::Formula(formula) => formula.referenced_cells().to_vec(),
            _ => Vec::new(),
        };

        self.remove_dependencies(position);
        self.cells.insert(position, Cell::with_content(content));

        if !references.is_empty() {
            for &reference in &references {
                self.cells.entry(reference).or_insert_with(Cell::empty);
                self.dependents
                    .entry(reference)
                    .or_insert_with(HashSet::new)
                    .insert(position);
            }
            self.dependencies
                .insert(position, references.into_iter().collect());
        }

        self.invalidate_dependents(position);
        Ok(())
    }

    /// Returns the cell at `position`, or `None` when the slot was never
    /// materialized. Never allocates.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidPosition`] when `position` is invalid.
    pub fn get_cell(&self, position: Position) -> DomainResult<Option<&Cell>> {
        if !position.is_valid() {
            return Err(DomainError::InvalidPosition(position_description(position)));
        }
        Ok(self.cells.get(&position))
    }

    /// Empties the cell at `position`.
    ///
    /// The slot itself persists, so cells depending on it keep valid
    /// edges; their cached results are invalidated.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidPosition`] when `position` is invalid.
    pub fn clear_cell(&mut self, position: Position) -> DomainResult<()> {
        if !position.is_valid() {
            return Err(DomainError::InvalidPosition(position_description(position)));
        }

        if self.cells.contains_key(&position) {
            self.remove_dependencies(position);
            self.cells.insert(position, Cell::empty());
            self.invalidate_dependents(position);
        }
        Ok(())
    }

    /// Returns the user-visible value of the cell at `position`.
    ///
    /// Empty or absent cells read as the number `0`; text reads with the
    /// escape sign stripped; a formula reads its cached result or is
    /// evaluated on the spot, caching the result iff it is a finite
    /// double.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidPosition`] when `position` is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridcalc::domain::{CellValue, Position, Spreadsheet};
    ///
    /// let mut sheet = Spreadsheet::new();
    /// sheet.set_cell(Position::parse("A1"), "'123").unwrap();
    /// assert_eq!(
    ///     sheet.value(Position::parse("A1")).unwrap(),
    ///     CellValue::Text("123".to_string()),
    /// );
    /// ```
    pub fn value(&mut self, position: Position) -> DomainResult<CellValue> {
        if !position.is_valid() {
            return Err(DomainError::InvalidPosition(position_description(position)));
        }
        Ok(self.value_at(position))
    }

    /// Returns the smallest rectangle containing every non-empty cell.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridcalc::domain::{Position, Size, Spreadsheet};
    ///
    /// let mut sheet = Spreadsheet::new();
    /// sheet.set_cell(Position::parse("C3"), "x").unwrap();
    /// assert_eq!(sheet.printable_size(), Size { rows: 3, cols: 3 });
    /// ```
    pub fn printable_size(&self) -> Size {
        let mut size = Size::default();
        for (position, cell) in &self.cells {
            if cell.is_empty() {
                continue;
            }
            size.rows = size.rows.max(position.row + 1);
            size.cols = size.cols.max(position.col + 1);
        }
        size
    }

    /// Checks whether any cell's formula currently reads from `position`.
    pub fn is_referenced(&self, position: Position) -> bool {
        self.dependents
            .get(&position)
            .map_or(false, |entry| !entry.is_empty())
    }

    /// Writes the displayed values of the printable rectangle to `out`,
    /// tab-separated within rows, one line per row. Materialized cells
    /// print their displayed value (an empty cell displays `0`); absent
    /// slots print an empty field.
    pub fn print_values<W: io::Write>(&mut self, out: &mut W) -> io::Result<()> {
        let size = self.printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col != 0 {
                    write!(out, "\t")?;
                }
                let position = Position::new(row, col);
                if self.cells.contains_key(&position) {
                    write!(out, "{}", self.value_at(position))?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Writes the raw texts of the printable rectangle to `out`,
    /// tab-separated within rows, one line per row.
    pub fn print_texts<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let size = self.printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col != 0 {
                    write!(out, "\t")?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    write!(out, "{}", cell.text())?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Computes a cell's user-visible value, memoizing formula results.
    fn value_at(&mut self, position: Position) -> CellValue {
        let cell = match self.cells.get(&position) {
            Some(cell) => cell.clone(),
            None => return CellValue::Number(0.0),
        };

        match cell.content() {
            CellContent::Empty => CellValue::Number(0.0),
            CellContent::Text(text) => CellValue::Text(display_text(text).to_string()),
            CellContent::Formula(_) => match self.numeric_value(position) {
                Ok(value) => CellValue::Number(value),
                Err(error) => CellValue::Error(error),
            },
        }
    }

    /// Resolves a position to the number a formula reads from it.
    ///
    /// Formula cells evaluate depth-first through their own references, so
    /// every reachable formula cell ends up either cached or erroring.
    fn numeric_value(&mut self, position: Position) -> Result<f64, FormulaError> {
        if !position.is_valid() {
            return Err(FormulaError::Ref);
        }

        let cell = match self.cells.get(&position) {
            Some(cell) => cell.clone(),
            None => return Ok(0.0),
        };

        match cell.content() {
            CellContent::Empty => Ok(0.0),
            CellContent::Text(text) => numeric_text_value(display_text(text)),
            CellContent::Formula(formula) => {
                if let Some(cached) = cell.cached_value() {
                    return Ok(cached);
                }

                let value = formula
                    .ast()
                    .evaluate(&mut |reference| self.numeric_value(reference))?;

                if let Some(slot) = self.cells.get_mut(&position) {
                    slot.cache = Some(value);
                }
                Ok(value)
            }
        }
    }

    /// Checks whether wiring `references` as the out-edges of `target`
    /// would close a cycle, walking the committed out-edge map depth-first.
    fn creates_cycle(&self, target: Position, references: &[Position]) -> bool {
        let mut visited: HashSet<Position> = HashSet::new();
        visited.insert(target);

        let mut pending: Vec<Position> = references.to_vec();
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.dependencies.get(&current) {
                pending.extend(next.iter().copied());
            }
        }
        false
    }

    /// Drops the out-edges of `position` together with their reciprocal
    /// in-edges.
    fn remove_dependencies(&mut self, position: Position) {
        if let Some(references) = self.dependencies.remove(&position) {
            for reference in references {
                if let Some(entry) = self.dependents.get_mut(&reference) {
                    entry.remove(&position);
                    if entry.is_empty() {
                        self.dependents.remove(&reference);
                    }
                }
            }
        }
    }

    /// Clears the cached results of every transitive dependent of
    /// `origin`.
    ///
    /// An already-uncached dependent short-circuits its branch: its own
    /// dependents were invalidated when it lost its cache. Siblings keep
    /// being visited.
    fn invalidate_dependents(&mut self, origin: Position) {
        let mut visited: HashSet<Position> = HashSet::new();
        visited.insert(origin);

        let mut pending: VecDeque<Position> = match self.dependents.get(&origin) {
            Some(direct) => direct.iter().copied().collect(),
            None => return,
        };

        while let Some(current) = pending.pop_front() {
            if !visited.insert(current) {
                continue;
            }

            let invalidated = match self.cells.get_mut(&current) {
                Some(cell) => cell.invalidate_cache(),
                None => false,
            };

            if invalidated {
                if let Some(next) = self.dependents.get(&current) {
                    pending.extend(next.iter().copied());
                }
            }
        }
    }
}

impl serde::Serialize for Spreadsheet {
    /// Serializes the sheet as a sequence of `(row, col, raw_text)`
    /// entries over its non-empty cells, ordered by position.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;

        let mut entries: Vec<(Position, String)> = self
            .cells
            .iter()
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(&position, cell)| (position, cell.text()))
            .collect();
        entries.sort_by_key(|&(position, _)| position);

        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for (position, text) in entries {
            seq.serialize_element(&(position.row, position.col, text))?;
        }
        seq.end()
    }
}

impl<'de> serde::Deserialize<'de> for Spreadsheet {
    /// Rebuilds a sheet by replaying `set_cell` over the serialized
    /// entries, restoring cells, dependency edges, and lazy evaluation
    /// state in one pass. Unparseable formulas or cycles in the input
    /// surface as deserialization errors.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{SeqAccess, Visitor};

        struct CellsVisitor;

        impl<'de> Visitor<'de> for CellsVisitor {
            type Value = Spreadsheet;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a sequence of (row, col, text) cell entries")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Spreadsheet, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut sheet = Spreadsheet::new();
                while let Some((row, col, text)) = seq.next_element::<(i32, i32, String)>()? {
                    sheet
                        .set_cell(Position::new(row, col), &text)
                        .map_err(serde::de::Error::custom)?;
                }
                Ok(sheet)
            }
        }

        deserializer.deserialize_seq(CellsVisitor)
    }
}
