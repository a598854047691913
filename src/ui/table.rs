use crate::model::{AttributeMapping, ServiceProvider};
use crate::storage::StoreStats;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &StoreStats) -> String {
    let mut builder = TableBuilder::new();
    builder.add_row("Schema version", stats.schema_version.as_deref().unwrap_or("none"));
    builder.add_row("Service providers", &stats.service_providers.to_string());
    builder.add_row("Attribute mappings", &stats.attributes.to_string());
    builder.add_row("Key pairs", &stats.keypairs.to_string());
    builder.build()
}

#[derive(Tabled)]
struct SpRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Protocol")]
    protocol: &'static str,
    #[tabled(rename = "Issuer")]
    issuer: String,
    #[tabled(rename = "ACS URL")]
    acs_url: String,
}

pub fn sp_table(sps: &[ServiceProvider]) -> String {
    let rows: Vec<SpRow> = sps
        .iter()
        .map(|sp| SpRow {
            id: sp.id,
            name: sp.name.clone(),
            protocol: sp.protocol.as_str(),
            issuer: sp.issuer.clone(),
            acs_url: sp.acs_url.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct AttributeRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Claim")]
    name: String,
    #[tabled(rename = "Source")]
    value: String,
    #[tabled(rename = "Kind")]
    kind: String,
}

pub fn attribute_table(attrs: &[AttributeMapping]) -> String {
    let rows: Vec<AttributeRow> = attrs
        .iter()
        .map(|a| AttributeRow {
            id: a.id,
            name: a.name.clone(),
            value: a.value.clone(),
            kind: a.kind.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}
