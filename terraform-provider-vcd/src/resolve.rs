//! Catalog item identity resolution
//!
//! Catalog items have carried three kinds of identifier over time: the
//! legacy `catalog:item` composite, the plain name, and the canonical
//! `urn:vcloud:catalogitem:<uuid>`. Resolution always ends on the canonical
//! ID. Data sources may also select an item with a filter.

use crate::client::uuid_from_href;
use crate::config::VcdContext;
use crate::error::{ProviderError, Result};
use crate::types::{Catalog, CatalogItem, CatalogItemRecord, Metadata};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Who is asking; decides how not-found is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Resource,
    DataSource,
}

/// Empty identifiers and the pre-URN `catalog:item` format resolve by name
pub fn is_deprecated_identifier(identifier: &str) -> bool {
    identifier.is_empty() || identifier.matches(':').count() <= 1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    pub key: String,
    /// Regular expression matched against the value
    pub value: String,
}

/// `filter` block of the catalog item data source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogItemFilter {
    pub name_regex: String,
    /// `<op> <date>`, e.g. `>= 2021-03-01`
    pub date: String,
    pub latest: bool,
    pub earliest: bool,
    pub metadata: Vec<MetadataFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

#[derive(Debug, Clone)]
struct DateCondition {
    op: DateOp,
    at: DateTime<Utc>,
}

impl DateCondition {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (op, rest) = [
            (">=", DateOp::Ge),
            ("<=", DateOp::Le),
            ("==", DateOp::Eq),
            (">", DateOp::Gt),
            ("<", DateOp::Lt),
        ]
        .iter()
        .find_map(|(prefix, op)| raw.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
        .ok_or_else(|| {
            ProviderError::validation(format!(
                "date filter '{}' must start with one of >, >=, <, <=, ==",
                raw
            ))
        })?;

        let at = DateTime::parse_from_rfc3339(rest)
            .map(|d| d.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDate::parse_from_str(rest, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
            })
            .map_err(|_| ProviderError::validation(format!("invalid date in filter: {}", rest)))?;

        Ok(Self { op, at })
    }

    fn matches(&self, created: &DateTime<Utc>) -> bool {
        match self.op {
            DateOp::Gt => created > &self.at,
            DateOp::Ge => created >= &self.at,
            DateOp::Lt => created < &self.at,
            DateOp::Le => created <= &self.at,
            DateOp::Eq => created == &self.at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Unique,
    Latest,
    Earliest,
}

/// A validated filter, ready to run against catalog records
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    name: Option<Regex>,
    date: Option<DateCondition>,
    metadata: Vec<(String, Regex)>,
    pick: Pick,
}

impl CatalogItemFilter {
    pub fn compile(&self) -> Result<CompiledFilter> {
        if self.latest && self.earliest {
            return Err(ProviderError::validation(
                "only one of 'latest' or 'earliest' can be set in a filter",
            ));
        }

        let name = (!self.name_regex.is_empty())
            .then(|| Regex::new(&self.name_regex))
            .transpose()
            .map_err(|e| ProviderError::validation(format!("invalid name_regex: {}", e)))?;
        let date = (!self.date.is_empty())
            .then(|| DateCondition::parse(&self.date))
            .transpose()?;
        let metadata = self
            .metadata
            .iter()
            .map(|m| {
                Regex::new(&m.value)
                    .map(|re| (m.key.clone(), re))
                    .map_err(|e| {
                        ProviderError::validation(format!("invalid metadata value for {}: {}", m.key, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let pick = match (self.latest, self.earliest) {
            (true, _) => Pick::Latest,
            (_, true) => Pick::Earliest,
            _ => Pick::Unique,
        };

        if name.is_none() && date.is_none() && metadata.is_empty() && pick == Pick::Unique {
            return Err(ProviderError::validation("filter needs at least one criterion"));
        }

        Ok(CompiledFilter {
            name,
            date,
            metadata,
            pick,
        })
    }
}

impl CompiledFilter {
    pub fn needs_metadata(&self) -> bool {
        !self.metadata.is_empty()
    }

    /// Name and date criteria only
    pub fn matches_record(&self, record: &CatalogItemRecord) -> bool {
        if let Some(re) = &self.name {
            if !re.is_match(&record.name) {
                return false;
            }
        }
        if let Some(date) = &self.date {
            match &record.creation_date {
                Some(created) if date.matches(created) => {}
                _ => return false,
            }
        }
        true
    }

    pub fn matches_metadata(&self, metadata: &Metadata) -> bool {
        self.metadata.iter().all(|(key, re)| {
            metadata
                .get(key)
                .map(|value| re.is_match(value))
                .unwrap_or(false)
        })
    }

    /// Reduce the matching records to exactly one
    pub fn select(&self, matches: Vec<CatalogItemRecord>) -> Result<CatalogItemRecord> {
        let count = matches.len();
        let picked = match self.pick {
            Pick::Unique if count > 1 => {
                return Err(ProviderError::AmbiguousMatch(format!(
                    "more than one catalog item ({}) found with the given filter",
                    count
                )))
            }
            Pick::Unique => matches.into_iter().next(),
            Pick::Latest => matches.into_iter().max_by_key(|r| r.creation_date),
            // undated records sort last
            Pick::Earliest => matches
                .into_iter()
                .min_by_key(|r| (r.creation_date.is_none(), r.creation_date)),
        };
        picked.ok_or_else(|| {
            ProviderError::AmbiguousMatch("no catalog item found with the given filter".to_string())
        })
    }
}

/// Inputs for a catalog item lookup
#[derive(Debug, Clone, Default)]
pub struct CatalogItemLookup<'a> {
    pub org: Option<&'a str>,
    pub catalog: &'a str,
    /// Identifier currently held in state; may be empty or legacy
    pub id: &'a str,
    pub name: &'a str,
    pub filter: Option<&'a CatalogItemFilter>,
}

#[derive(Debug, Clone)]
pub struct ResolvedCatalogItem {
    pub catalog: Catalog,
    pub item: CatalogItem,
}

pub const NO_NAME_OR_FILTER: &str = "one of 'name' or 'filter' is required for vcd_catalog_item";

/// Resolve a catalog item. `Ok(None)` only for resources whose item has
/// disappeared: the caller removes it from state.
pub async fn find_catalog_item(
    ctx: &VcdContext,
    lookup: &CatalogItemLookup<'_>,
    origin: Origin,
) -> Result<Option<ResolvedCatalogItem>> {
    tracing::trace!(catalog = lookup.catalog, "catalog item read initiated");

    let org = ctx.org_name(lookup.org)?;
    let catalog = ctx
        .api
        .get_catalog_by_name(&org, lookup.catalog)
        .await
        .map_err(|e| ProviderError::remote("unable to find catalog", e))?;

    let identifier = if is_deprecated_identifier(lookup.id) {
        lookup.name
    } else {
        lookup.id
    };

    if origin == Origin::DataSource {
        if lookup.name.is_empty() && lookup.filter.is_none() {
            return Err(ProviderError::validation(NO_NAME_OR_FILTER));
        }
        if let Some(filter) = lookup.filter {
            let item = find_by_filter(ctx, &catalog, filter).await?;
            return Ok(Some(ResolvedCatalogItem { catalog, item }));
        }
    }

    match ctx.api.get_catalog_item_by_name_or_id(&catalog, identifier).await {
        Ok(item) => {
            tracing::trace!(id = %item.id, "catalog item read completed");
            Ok(Some(ResolvedCatalogItem { catalog, item }))
        }
        Err(e) if e.is_not_found() && origin == Origin::Resource => {
            tracing::info!(identifier, "unable to find catalog item, removing from state");
            Ok(None)
        }
        Err(e) if e.is_not_found() => Err(ProviderError::not_found("catalog item", identifier)),
        Err(e) => Err(ProviderError::remote(
            format!("unable to find catalog item {}", identifier),
            e,
        )),
    }
}

async fn find_by_filter(
    ctx: &VcdContext,
    catalog: &Catalog,
    filter: &CatalogItemFilter,
) -> Result<CatalogItem> {
    let compiled = filter.compile()?;
    let records = ctx
        .api
        .list_catalog_items(catalog)
        .await
        .map_err(|e| ProviderError::remote("error retrieving catalog items", e))?;

    let mut matches = Vec::new();
    for record in records.into_iter().filter(|r| compiled.matches_record(r)) {
        if compiled.needs_metadata() {
            let metadata = ctx
                .api
                .get_catalog_item_metadata(&record.href)
                .await
                .map_err(|e| ProviderError::remote("error retrieving catalog item metadata", e))?;
            if !compiled.matches_metadata(&metadata) {
                continue;
            }
        }
        matches.push(record);
    }
    tracing::debug!(count = matches.len(), "catalog items matching filter");

    let selected = compiled.select(matches)?;
    let id = uuid_from_href(&selected.href)
        .map(|uuid| format!("urn:vcloud:catalogitem:{}", uuid))
        .map_err(|e| ProviderError::remote("invalid catalog item reference", e))?;
    ctx.api
        .get_catalog_item_by_name_or_id(catalog, &id)
        .await
        .map_err(|e| ProviderError::remote(format!("unable to retrieve catalog item {}", id), e))
}
