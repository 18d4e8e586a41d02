/*!
 * # Reports
 *
 * Chart data for the reporting pages. Every report returns the same shape, a list of labels
 * and one dataset, so the browser can hand it to the charting library unchanged.
 *
 * Counts and sums are grouped in SQL. Stage durations need each row's predecessor, so that
 * report walks the ordered history instead.
 */

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::entities::{part, status_history, StatusType};
use crate::errors::ServiceError;

const ORDER_COMPLETION_LIMIT: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
    pub background_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<u32>,
}

/// Chart payload: `{labels, datasets}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

impl ChartData {
    fn single(labels: Vec<String>, dataset: Dataset) -> Self {
        Self {
            labels,
            datasets: vec![dataset],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRange {
    /// `YYYY-MM-DD`
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`, inclusive
    pub date_to: Option<String>,
}

fn parse_day(value: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ServiceError::InvalidInput(format!("Неверный формат даты: {}", value)))
}

impl DateRange {
    /// Half-open UTC bounds `[from, to)`; `date_to` covers the whole day.
    fn bounds(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ServiceError> {
        let start_of = |day: NaiveDate| Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
        let from = match self.date_from.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(value) => Some(start_of(parse_day(value)?)),
            None => None,
        };
        let to = match self.date_to.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(value) => parse_day(value)?.succ_opt().map(start_of),
            None => None,
        };
        Ok((from, to))
    }
}

fn as_totals(rows: Vec<(String, i64)>) -> HashMap<String, f64> {
    rows.into_iter()
        .map(|(label, total)| (label, total as f64))
        .collect()
}

/// Sorts `(label, value)` pairs by value, largest first; ties keep label order.
fn descending(totals: HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut rows: Vec<(String, f64)> = totals.into_iter().collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Completed stage confirmations per operator.
    #[instrument(skip(self))]
    pub async fn operator_performance(&self, range: &DateRange) -> Result<ChartData, ServiceError> {
        let (from, to) = range.bounds()?;
        let mut query = status_history::Entity::find()
            .filter(status_history::Column::StatusType.eq(StatusType::Completed));
        if let Some(from) = from {
            query = query.filter(status_history::Column::Timestamp.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(status_history::Column::Timestamp.lt(to));
        }
        let rows: Vec<(String, i64)> = query
            .select_only()
            .column(status_history::Column::OperatorName)
            .column_as(Expr::col(status_history::Column::Id).count(), "total")
            .group_by(status_history::Column::OperatorName)
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let (labels, data) = descending(as_totals(rows)).into_iter().unzip();

        Ok(ChartData::single(
            labels,
            Dataset {
                label: "Выполнено этапов".into(),
                data,
                background_color: "rgba(40, 167, 69, 0.7)".into(),
                border_color: Some("rgba(40, 167, 69, 1)".into()),
                border_width: Some(1),
            },
        ))
    }

    /// Average hours spent per stage. A row's duration runs from the previous row of the same
    /// part, or from the part's creation for its first row.
    #[instrument(skip(self))]
    pub async fn stage_duration(&self) -> Result<ChartData, ServiceError> {
        let parts: HashMap<String, DateTime<Utc>> = part::Entity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.part_id, p.date_added))
            .collect();
        let rows = status_history::Entity::find()
            .order_by_asc(status_history::Column::PartId)
            .order_by_asc(status_history::Column::Timestamp)
            .order_by_asc(status_history::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut sums: HashMap<String, (f64, u32)> = HashMap::new();
        let mut previous: Option<(String, DateTime<Utc>)> = None;
        for row in rows {
            let Some(date_added) = parts.get(&row.part_id) else {
                continue;
            };
            let start = match &previous {
                Some((part_id, at)) if *part_id == row.part_id => *at,
                _ => *date_added,
            };
            let seconds = (row.timestamp - start).num_milliseconds() as f64 / 1000.0;
            let entry = sums.entry(row.status.clone()).or_default();
            entry.0 += seconds;
            entry.1 += 1;
            previous = Some((row.part_id, row.timestamp));
        }

        let averages = sums
            .into_iter()
            .map(|(stage, (total, count))| (stage, total / f64::from(count) / 3600.0))
            .collect();
        let (labels, data) = descending(averages).into_iter().unzip();

        Ok(ChartData::single(
            labels,
            Dataset {
                label: "Среднее время (в часах)".into(),
                data,
                background_color: "rgba(0, 123, 255, 0.7)".into(),
                border_color: Some("rgba(0, 123, 255, 1)".into()),
                border_width: Some(1),
            },
        ))
    }

    /// Days from creation to the last history row, for the most recently added parts whose whole
    /// batch passed the route. Scrapped pieces do not count as delivered.
    #[instrument(skip(self))]
    pub async fn order_completion(&self) -> Result<ChartData, ServiceError> {
        let finished: Vec<part::Model> = part::Entity::find()
            .filter(
                Expr::col(part::Column::QuantityCompleted)
                    .gte(Expr::col(part::Column::QuantityTotal)),
            )
            .order_by_desc(part::Column::DateAdded)
            .limit(ORDER_COMPLETION_LIMIT)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let ids: Vec<String> = finished.iter().map(|p| p.part_id.clone()).collect();

        let mut last_event: HashMap<String, DateTime<Utc>> = HashMap::new();
        for row in status_history::Entity::find()
            .filter(status_history::Column::PartId.is_in(ids))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        {
            let slot = last_event.entry(row.part_id).or_insert(row.timestamp);
            *slot = (*slot).max(row.timestamp);
        }

        let (labels, data) = finished
            .into_iter()
            .filter_map(|p| {
                let done_at = last_event.get(&p.part_id)?;
                let days = (*done_at - p.date_added).num_seconds() as f64 / 86_400.0;
                Some((p.part_id, days))
            })
            .unzip();

        Ok(ChartData::single(
            labels,
            Dataset {
                label: "Дней на выполнение".into(),
                data,
                background_color: "rgba(75, 192, 192, 0.7)".into(),
                border_color: None,
                border_width: None,
            },
        ))
    }

    /// Scrapped quantity per stage.
    #[instrument(skip(self))]
    pub async fn defect_analysis(&self) -> Result<ChartData, ServiceError> {
        let rows: Vec<(String, i64)> = status_history::Entity::find()
            .select_only()
            .column(status_history::Column::Status)
            .column_as(Expr::col(status_history::Column::Quantity).sum(), "total")
            .filter(status_history::Column::StatusType.eq(StatusType::Scrapped))
            .group_by(status_history::Column::Status)
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let (labels, data) = descending(as_totals(rows)).into_iter().unzip();

        Ok(ChartData::single(
            labels,
            Dataset {
                label: "Количество брака (шт.)".into(),
                data,
                background_color: "rgba(239, 68, 68, 0.7)".into(),
                border_color: Some("rgba(220, 38, 38, 1)".into()),
                border_width: Some(1),
            },
        ))
    }
}
