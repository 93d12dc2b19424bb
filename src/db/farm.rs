use rusqlite::{params, OptionalExtension, Row};

use super::*;

const PLOT_COLUMNS: &str = "pl.id, pl.property_id, pl.name, pl.area, pl.geometry, pl.soil_type";
const CROP_COLUMNS: &str = "id, plot_id, name, variety, status, planted_on";
const CYCLE_COLUMNS: &str = "id, plot_id, crop_id, name, started_on, ends_on, status";

impl FarmDb {
    // =========================================================================
    // Organizations & properties
    // =========================================================================

    pub fn get_organization(&self, id: &str) -> Result<Option<DbOrganization>, DbError> {
        let org = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM organizations WHERE id = ?1",
                [id],
                |row| {
                    Ok(DbOrganization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(org)
    }

    pub fn get_properties_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<DbProperty>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, city, state, total_area
             FROM properties WHERE organization_id = ?1
             ORDER BY name, id",
        )?;
        let rows = stmt.query_map([organization_id], map_property_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_property(&self, id: &str) -> Result<Option<DbProperty>, DbError> {
        let property = self
            .conn
            .query_row(
                "SELECT id, organization_id, name, city, state, total_area
                 FROM properties WHERE id = ?1",
                [id],
                map_property_row,
            )
            .optional()?;
        Ok(property)
    }

    // =========================================================================
    // Plots
    // =========================================================================

    /// Plots across every property of an organization, ordered by name.
    /// `limit = None` returns all of them.
    pub fn get_plots_for_organization(
        &self,
        organization_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DbPlot>, DbError> {
        let sql = format!(
            "SELECT {PLOT_COLUMNS}
             FROM plots pl
             JOIN properties pr ON pr.id = pl.property_id
             WHERE pr.organization_id = ?1
             ORDER BY pl.name, pl.id
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![organization_id, sql_limit(limit)], map_plot_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_plots_for_property(&self, property_id: &str) -> Result<Vec<DbPlot>, DbError> {
        let sql = format!(
            "SELECT {PLOT_COLUMNS} FROM plots pl WHERE pl.property_id = ?1 ORDER BY pl.name, pl.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([property_id], map_plot_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// A plot, only if it belongs to `organization_id`.
    pub fn get_plot_in_organization(
        &self,
        organization_id: &str,
        plot_id: &str,
    ) -> Result<Option<DbPlot>, DbError> {
        let sql = format!(
            "SELECT {PLOT_COLUMNS}
             FROM plots pl
             JOIN properties pr ON pr.id = pl.property_id
             WHERE pr.organization_id = ?1 AND pl.id = ?2"
        );
        let plot = self
            .conn
            .query_row(&sql, params![organization_id, plot_id], map_plot_row)
            .optional()?;
        Ok(plot)
    }

    // =========================================================================
    // Crops & cycles
    // =========================================================================

    /// Most recently planted crop with status `active`.
    pub fn get_active_crop(&self, plot_id: &str) -> Result<Option<DbCrop>, DbError> {
        let sql = format!(
            "SELECT {CROP_COLUMNS} FROM crops
             WHERE plot_id = ?1 AND status = 'active'
             ORDER BY planted_on DESC, id
             LIMIT 1"
        );
        let crop = self.conn.query_row(&sql, [plot_id], map_crop_row).optional()?;
        Ok(crop)
    }

    pub fn get_active_cycle(&self, plot_id: &str) -> Result<Option<DbCycle>, DbError> {
        let sql = format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles
             WHERE plot_id = ?1 AND status = 'active'
             ORDER BY started_on DESC, id
             LIMIT 1"
        );
        let cycle = self.conn.query_row(&sql, [plot_id], map_cycle_row).optional()?;
        Ok(cycle)
    }

    pub fn get_cycles_for_plot(
        &self,
        plot_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DbCycle>, DbError> {
        let sql = format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles
             WHERE plot_id = ?1
             ORDER BY started_on DESC, id
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![plot_id, sql_limit(limit)], map_cycle_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// SQLite treats a negative LIMIT as "no limit".
pub(crate) fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

fn map_property_row(row: &Row) -> rusqlite::Result<DbProperty> {
    Ok(DbProperty {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        city: row.get(3)?,
        state: row.get(4)?,
        total_area: row.get(5)?,
    })
}

fn map_plot_row(row: &Row) -> rusqlite::Result<DbPlot> {
    Ok(DbPlot {
        id: row.get(0)?,
        property_id: row.get(1)?,
        name: row.get(2)?,
        area: row.get(3)?,
        geometry: row.get(4)?,
        soil_type: row.get(5)?,
    })
}

fn map_crop_row(row: &Row) -> rusqlite::Result<DbCrop> {
    Ok(DbCrop {
        id: row.get(0)?,
        plot_id: row.get(1)?,
        name: row.get(2)?,
        variety: row.get(3)?,
        status: row.get(4)?,
        planted_on: row.get(5)?,
    })
}

fn map_cycle_row(row: &Row) -> rusqlite::Result<DbCycle> {
    Ok(DbCycle {
        id: row.get(0)?,
        plot_id: row.get(1)?,
        crop_id: row.get(2)?,
        name: row.get(3)?,
        started_on: row.get(4)?,
        ends_on: row.get(5)?,
        status: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;

    #[test]
    fn test_plots_scoped_to_organization() {
        let db = test_db();
        seed_org(&db);
        insert_plot(&db, "p2", "Talhao B", 3.0, None);
        insert_plot(&db, "p1", "Talhao A", 1.5, None);
        db.conn_ref()
            .execute_batch(
                "INSERT INTO organizations (id, name, created_at) VALUES ('org2', 'Other', '2026-01-01');
                 INSERT INTO properties (id, organization_id, name) VALUES ('prop2', 'org2', 'X');
                 INSERT INTO plots (id, property_id, name, area) VALUES ('p9', 'prop2', 'Foreign', 1.0);",
            )
            .unwrap();

        let plots = db.get_plots_for_organization("org1", None).unwrap();
        let ids: Vec<&str> = plots.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"], "ordered by name, other orgs excluded");

        let limited = db.get_plots_for_organization("org1", Some(1)).unwrap();
        assert_eq!(limited.len(), 1);

        assert!(db.get_plot_in_organization("org1", "p9").unwrap().is_none());
        assert!(db.get_plot_in_organization("org2", "p9").unwrap().is_some());
    }

    #[test]
    fn test_active_crop_ignores_harvested() {
        let db = test_db();
        seed_org(&db);
        insert_plot(&db, "p1", "Talhao A", 1.5, None);
        db.conn_ref()
            .execute(
                "INSERT INTO crops (id, plot_id, name, status, planted_on)
                 VALUES ('c-old', 'p1', 'Milho', 'harvested', '2026-10-01')",
                [],
            )
            .unwrap();
        assert!(db.get_active_crop("p1").unwrap().is_none());

        insert_crop(&db, "p1", "Soja");
        let crop = db.get_active_crop("p1").unwrap().expect("active crop");
        assert_eq!(crop.name, "Soja");
    }
}
