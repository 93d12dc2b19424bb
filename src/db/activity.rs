use rusqlite::{params, OptionalExtension, Row};

use super::farm::sql_limit;
use super::*;

impl FarmDb {
    // =========================================================================
    // Operations
    // =========================================================================

    /// Operations across the organization performed on or after `since`
    /// (`YYYY-MM-DD`), newest first.
    pub fn get_recent_operations(
        &self,
        organization_id: &str,
        since: &str,
    ) -> Result<Vec<DbOperation>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.plot_id, pl.name, o.kind, o.description, o.performed_on, o.cost
             FROM operations o
             JOIN plots pl ON pl.id = o.plot_id
             JOIN properties pr ON pr.id = pl.property_id
             WHERE pr.organization_id = ?1 AND o.performed_on >= ?2
             ORDER BY o.performed_on DESC, o.id",
        )?;
        let rows = stmt.query_map(params![organization_id, since], map_operation_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_operations_for_plot(
        &self,
        plot_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DbOperation>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.plot_id, pl.name, o.kind, o.description, o.performed_on, o.cost
             FROM operations o
             JOIN plots pl ON pl.id = o.plot_id
             WHERE o.plot_id = ?1
             ORDER BY o.performed_on DESC, o.id
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![plot_id, sql_limit(limit)], map_operation_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Date of the most recent operation on a plot, if any.
    pub fn get_last_operation_date(&self, plot_id: &str) -> Result<Option<String>, DbError> {
        let date: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(performed_on) FROM operations WHERE plot_id = ?1",
                [plot_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(date)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub fn get_tasks_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<DbTask>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, plot_id, title, status, priority, planned_end
             FROM tasks WHERE organization_id = ?1
             ORDER BY planned_end IS NULL, planned_end, id",
        )?;
        let rows = stmt.query_map([organization_id], |row| {
            Ok(DbTask {
                id: row.get(0)?,
                organization_id: row.get(1)?,
                plot_id: row.get(2)?,
                title: row.get(3)?,
                status: row.get(4)?,
                priority: row.get(5)?,
                planned_end: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    pub fn get_inputs_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<DbInput>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, category, quantity, unit, min_stock, expires_on
             FROM inputs WHERE organization_id = ?1
             ORDER BY name, id",
        )?;
        let rows = stmt.query_map([organization_id], |row| {
            Ok(DbInput {
                id: row.get(0)?,
                organization_id: row.get(1)?,
                name: row.get(2)?,
                category: row.get(3)?,
                quantity: row.get(4)?,
                unit: row.get(5)?,
                min_stock: row.get(6)?,
                expires_on: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Agricultural calendar
    // =========================================================================

    pub fn get_calendar_rules(&self) -> Result<Vec<DbCalendarRule>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, crop, activity, start_month, end_month, region, notes
             FROM calendar_rules
             ORDER BY crop, start_month, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbCalendarRule {
                id: row.get(0)?,
                crop: row.get(1)?,
                activity: row.get(2)?,
                start_month: row.get(3)?,
                end_month: row.get(4)?,
                region: row.get(5)?,
                notes: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn map_operation_row(row: &Row) -> rusqlite::Result<DbOperation> {
    Ok(DbOperation {
        id: row.get(0)?,
        plot_id: row.get(1)?,
        plot_name: row.get(2)?,
        kind: row.get(3)?,
        description: row.get(4)?,
        performed_on: row.get(5)?,
        cost: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::super::test_utils::*;

    #[test]
    fn test_recent_operations_window() {
        let db = test_db();
        seed_org(&db);
        insert_plot(&db, "p1", "Talhao A", 1.5, None);
        insert_operation(&db, "p1", "spraying", "2026-10-10");
        insert_operation(&db, "p1", "planting", "2026-08-01");

        let ops = db.get_recent_operations("org1", "2026-09-18").unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, "spraying");
        assert_eq!(ops[0].plot_name.as_deref(), Some("Talhao A"));

        assert_eq!(
            db.get_last_operation_date("p1").unwrap().as_deref(),
            Some("2026-10-10")
        );
        assert!(db.get_last_operation_date("nope").unwrap().is_none());
    }

    #[test]
    fn test_task_overdue_classification() {
        let db = test_db();
        seed_org(&db);
        insert_task(&db, "t1", "Fix fence", "pending", Some("2026-10-01"));
        insert_task(&db, "t2", "Harvest", "completed", Some("2026-09-01"));
        insert_task(&db, "t3", "Scout", "in_progress", None);

        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let tasks = db.get_tasks_for_organization("org1").unwrap();
        let overdue: Vec<&str> = tasks
            .iter()
            .filter(|t| t.is_overdue(today))
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(overdue, vec!["t1"]);
    }
}
