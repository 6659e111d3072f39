//! Per-column type metadata inferred from observed items.
//!
//! DynamoDB has no schema, so the driver watches attribute values go by and
//! votes: every observation bumps a per-type counter, and conflicts resolve
//! toward the most *flexible* SQL type that can represent everything seen.
//! A column observed as both strings and numbers is a VARCHAR; a column of
//! numbers only is NUMERIC.

use std::collections::HashMap;

use dynosql_client::AttributeValue;
use dynosql_client::Item;
use dynosql_client::ScalarAttributeType;
use dynosql_client::TableDescription;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Varchar,
    Clob,
    Numeric,
    Decimal,
    Integer,
    Bigint,
    Double,
    Float,
    Array,
    Struct,
    Binary,
    Varbinary,
    Boolean,
    Bit,
    Null,
}

impl SqlType {
    /// Flexibility rank used for conflict resolution; lower wins because it
    /// can represent more of what was observed.
    pub fn flexibility_rank(self) -> u8 {
        match self {
            SqlType::Varchar => 1,
            SqlType::Clob => 2,
            SqlType::Numeric | SqlType::Decimal => 3,
            SqlType::Double | SqlType::Float | SqlType::Bigint | SqlType::Integer => 4,
            SqlType::Array => 5,
            SqlType::Struct => 6,
            SqlType::Binary | SqlType::Varbinary => 7,
            SqlType::Boolean | SqlType::Bit => 8,
            SqlType::Null => u8::MAX,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            SqlType::Varchar => "VARCHAR",
            SqlType::Clob => "CLOB",
            SqlType::Numeric => "NUMERIC",
            SqlType::Decimal => "DECIMAL",
            SqlType::Integer => "INTEGER",
            SqlType::Bigint => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Float => "FLOAT",
            SqlType::Array => "ARRAY",
            SqlType::Struct => "STRUCT",
            SqlType::Binary => "BINARY",
            SqlType::Varbinary => "VARBINARY",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Bit => "BIT",
            SqlType::Null => "NULL",
        }
    }

    /// Metadata mapping from a wire tag. Numbers always report NUMERIC at
    /// the metadata level; typed getters decide integral vs fractional on
    /// access.
    pub fn from_value(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::S(_) => SqlType::Varchar,
            AttributeValue::N(_) => SqlType::Numeric,
            AttributeValue::Bool(_) => SqlType::Boolean,
            AttributeValue::B(_) => SqlType::Binary,
            AttributeValue::Null => SqlType::Null,
            AttributeValue::Ss(_)
            | AttributeValue::Ns(_)
            | AttributeValue::Bs(_)
            | AttributeValue::L(_) => SqlType::Array,
            AttributeValue::M(_) => SqlType::Struct,
        }
    }

    pub fn from_scalar(scalar: ScalarAttributeType) -> Self {
        match scalar {
            ScalarAttributeType::S => SqlType::Varchar,
            ScalarAttributeType::N => SqlType::Numeric,
            ScalarAttributeType::B => SqlType::Binary,
        }
    }

    pub fn default_column_size(self) -> u32 {
        match self {
            SqlType::Varchar | SqlType::Clob => 2_048,
            SqlType::Numeric
            | SqlType::Decimal
            | SqlType::Integer
            | SqlType::Bigint
            | SqlType::Double
            | SqlType::Float => 38,
            SqlType::Boolean | SqlType::Bit => 1,
            SqlType::Binary | SqlType::Varbinary => 1_024,
            SqlType::Array | SqlType::Struct | SqlType::Null => 0,
        }
    }

    pub fn default_decimal_digits(self) -> u32 {
        match self {
            SqlType::Numeric | SqlType::Decimal | SqlType::Double | SqlType::Float => 10,
            _ => 0,
        }
    }
}

/// Where a column's metadata came from, in decreasing order of authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoverySource {
    KeySchema,
    Hints,
    Sampling,
    InfoOnly,
}

/// Accumulated observations and derived metadata for one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub table: String,
    pub column: String,
    pub type_observations: HashMap<SqlType, u64>,
    pub total_observations: u64,
    pub null_observations: u64,
    pub source: DiscoverySource,
}

impl ColumnMetadata {
    pub fn new(table: impl Into<String>, column: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            type_observations: HashMap::new(),
            total_observations: 0,
            null_observations: 0,
            source,
        }
    }

    /// A column declared by the table description rather than observed:
    /// one synthetic observation of the declared type, known non-null when
    /// it is a key attribute.
    pub fn declared(
        table: impl Into<String>,
        column: impl Into<String>,
        sql_type: SqlType,
        source: DiscoverySource,
    ) -> Self {
        let mut metadata = Self::new(table, column, source);
        metadata.total_observations = 1;
        metadata.type_observations.insert(sql_type, 1);
        metadata
    }

    /// Record one observation. `None` means the attribute was absent from
    /// the item, which counts as a null sighting.
    pub fn observe(&mut self, value: Option<&AttributeValue>) {
        self.total_observations += 1;
        match value {
            None => self.null_observations += 1,
            Some(value) if value.is_null() => self.null_observations += 1,
            Some(value) => {
                *self
                    .type_observations
                    .entry(SqlType::from_value(value))
                    .or_insert(0) += 1;
            }
        }
    }

    /// The winning SQL type: lowest flexibility rank among observed types,
    /// ties broken by higher observation count. The winner must be able to
    /// represent every other observed type; a conflict between types with
    /// no common representation (BINARY vs BOOLEAN, ARRAY vs STRUCT)
    /// degrades to VARCHAR, which has a textual form for everything.
    /// Columns with no non-null observations also default to VARCHAR.
    pub fn resolved_type(&self) -> SqlType {
        let Some(winner) = self
            .type_observations
            .iter()
            .min_by(|(left_type, left_count), (right_type, right_count)| {
                left_type
                    .flexibility_rank()
                    .cmp(&right_type.flexibility_rank())
                    .then(right_count.cmp(left_count))
            })
            .map(|(sql_type, _)| *sql_type)
        else {
            return SqlType::Varchar;
        };
        let representable = self
            .type_observations
            .keys()
            .all(|observed| can_represent(winner, *observed));
        if representable { winner } else { SqlType::Varchar }
    }

    pub fn type_name(&self) -> &'static str {
        self.resolved_type().type_name()
    }

    pub fn nullable(&self) -> bool {
        self.null_observations > 0 || self.total_observations == self.null_observations
    }

    pub fn has_type_conflict(&self) -> bool {
        self.type_observations.len() > 1
    }

    /// Share of non-null observations explained by the winning type.
    pub fn type_confidence(&self) -> f64 {
        let non_null = self.total_observations - self.null_observations;
        if non_null == 0 {
            return 0.0;
        }
        let dominant = self
            .type_observations
            .get(&self.resolved_type())
            .copied()
            .unwrap_or(0);
        dominant as f64 / non_null as f64
    }

    pub fn column_size(&self) -> u32 {
        self.resolved_type().default_column_size()
    }

    pub fn decimal_digits(&self) -> u32 {
        self.resolved_type().default_decimal_digits()
    }
}

/// Whether `wide` can carry every value observed as `narrow`.
fn can_represent(wide: SqlType, narrow: SqlType) -> bool {
    if wide == narrow {
        return true;
    }
    match wide.flexibility_rank() {
        // Textual types have a rendering for every tag.
        1 | 2 => true,
        // Numeric types absorb the narrower numerics.
        3 | 4 => matches!(narrow.flexibility_rank(), 3 | 4),
        _ => false,
    }
}

/// Ordered per-table column map; insertion order is discovery order.
pub type ColumnMap = IndexMap<String, ColumnMetadata>;

/// Streams sampled items into per-column observations, back-filling null
/// sightings for attributes that later items omit or that appear late.
#[derive(Debug)]
pub struct TableSchemaBuilder {
    table: String,
    source: DiscoverySource,
    columns: ColumnMap,
    items_observed: u64,
}

impl TableSchemaBuilder {
    pub fn new(table: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            table: table.into(),
            source,
            columns: ColumnMap::new(),
            items_observed: 0,
        }
    }

    pub fn observe_items(&mut self, items: &[Item]) {
        for item in items {
            self.observe_item(item);
        }
    }

    pub fn observe_item(&mut self, item: &Item) {
        for name in item.keys() {
            if !self.columns.contains_key(name) {
                let mut metadata =
                    ColumnMetadata::new(self.table.clone(), name.clone(), self.source);
                // The attribute was missing from every earlier item.
                metadata.total_observations = self.items_observed;
                metadata.null_observations = self.items_observed;
                self.columns.insert(name.clone(), metadata);
            }
        }
        for (name, metadata) in &mut self.columns {
            metadata.observe(item.get(name));
        }
        self.items_observed += 1;
    }

    pub fn items_observed(&self) -> u64 {
        self.items_observed
    }

    pub fn finish(self) -> ColumnMap {
        self.columns
    }
}

/// Partition/sort key names for a table, used for `SELECT *` column
/// ordering and updatable result sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableKeyHint {
    pub partition_key: Option<String>,
    pub sort_key: Option<String>,
}

impl TableKeyHint {
    pub fn from_description(description: &TableDescription) -> Self {
        Self {
            partition_key: description.partition_key().map(str::to_string),
            sort_key: description.sort_key().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use dynosql_client::AttributeValue;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn column_with(observations: &[(SqlType, u64)]) -> ColumnMetadata {
        let mut metadata = ColumnMetadata::new("t", "c", DiscoverySource::Sampling);
        for (sql_type, count) in observations {
            metadata.type_observations.insert(*sql_type, *count);
            metadata.total_observations += count;
        }
        metadata
    }

    #[test]
    fn string_number_conflict_resolves_to_varchar() {
        let metadata = column_with(&[(SqlType::Varchar, 3), (SqlType::Numeric, 5)]);
        assert_eq!(metadata.resolved_type(), SqlType::Varchar);
        assert!(metadata.has_type_conflict());
    }

    #[test]
    fn pure_numbers_stay_numeric() {
        let metadata = column_with(&[(SqlType::Numeric, 4)]);
        assert_eq!(metadata.resolved_type(), SqlType::Numeric);
        assert!(!metadata.has_type_conflict());
        assert_eq!(metadata.type_confidence(), 1.0);
    }

    #[test]
    fn binary_boolean_conflict_degrades_to_varchar() {
        let metadata = column_with(&[(SqlType::Binary, 2), (SqlType::Boolean, 2)]);
        assert_eq!(metadata.resolved_type(), SqlType::Varchar);
    }

    #[test]
    fn equal_rank_ties_break_by_count() {
        let metadata = column_with(&[(SqlType::Integer, 2), (SqlType::Double, 6)]);
        assert_eq!(metadata.resolved_type(), SqlType::Double);
    }

    #[test]
    fn confidence_ignores_nulls() {
        let mut metadata = column_with(&[(SqlType::Varchar, 3), (SqlType::Numeric, 1)]);
        metadata.total_observations += 4;
        metadata.null_observations = 4;
        assert_eq!(metadata.type_confidence(), 0.75);
        assert!(metadata.nullable());
    }

    #[test]
    fn all_null_columns_are_nullable_varchar_with_zero_confidence() {
        let mut metadata = ColumnMetadata::new("t", "c", DiscoverySource::Sampling);
        metadata.observe(Some(&AttributeValue::Null));
        metadata.observe(None);
        assert_eq!(metadata.resolved_type(), SqlType::Varchar);
        assert!(metadata.nullable());
        assert_eq!(metadata.type_confidence(), 0.0);
    }

    #[test]
    fn builder_backfills_missing_attributes_as_nulls() {
        let mut builder = TableSchemaBuilder::new("t", DiscoverySource::Sampling);
        builder.observe_items(&[
            hashmap! {
                "id".to_string() => AttributeValue::N("1".to_string()),
                "name".to_string() => AttributeValue::S("a".to_string()),
            },
            hashmap! {
                "id".to_string() => AttributeValue::N("2".to_string()),
            },
            hashmap! {
                "id".to_string() => AttributeValue::N("3".to_string()),
                "late".to_string() => AttributeValue::Bool(true),
            },
        ]);
        let columns = builder.finish();

        let id = &columns["id"];
        assert_eq!(id.total_observations, 3);
        assert_eq!(id.null_observations, 0);
        assert!(!id.nullable());

        let name = &columns["name"];
        assert_eq!(name.total_observations, 3);
        assert_eq!(name.null_observations, 2);
        assert!(name.nullable());

        let late = &columns["late"];
        assert_eq!(late.total_observations, 3);
        assert_eq!(late.null_observations, 2);
        assert_eq!(late.resolved_type(), SqlType::Boolean);
    }
}
