use std::sync::{Mutex, MutexGuard};

use cronwell_core::cluster::{ClusterNode, NodeKey};
use cronwell_core::ports::ClusterStore;
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::db::{row_time, to_db_time};
use crate::error::{Result, StoreError};

/// Node registry backed by the `cluster_nodes` table.
///
/// Pure CRUD: liveness decisions belong to the gossip layer.
pub struct NodeRegistry {
    db: Mutex<Connection>,
}

impl NodeRegistry {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    ///
    /// Registry reads tolerate dirty data, so the connection runs with
    /// `read_uncommitted` on.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "read_uncommitted", 1)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    #[instrument(skip(self))]
    pub fn get_cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT server, port, instance_id, cluster_port, join_date, health_check_date
             FROM cluster_nodes
             ORDER BY join_date, server, port",
        )?;
        let rows = stmt.query_map([], row_to_node)?;
        let nodes = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = nodes.len(), "loaded cluster nodes");
        Ok(nodes)
    }

    #[instrument(skip(self), fields(node = %key))]
    pub fn get_cluster_node(&self, key: &NodeKey) -> Result<Option<ClusterNode>> {
        let db = self.conn()?;
        match db.query_row(
            "SELECT server, port, instance_id, cluster_port, join_date, health_check_date
             FROM cluster_nodes WHERE server = ?1 AND port = ?2",
            params![key.server, key.port],
            row_to_node,
        ) {
            Ok(node) => Ok(Some(node)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    #[instrument(skip(self), fields(node = %node))]
    pub fn add_cluster_node(&self, node: &ClusterNode) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO cluster_nodes
             (server, port, instance_id, cluster_port, join_date, health_check_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                node.server,
                node.port,
                node.instance_id,
                node.cluster_port,
                to_db_time(&node.join_date),
                to_db_time(&node.health_check_date),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(node = %node))]
    pub fn update_cluster_node(&self, node: &ClusterNode) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE cluster_nodes
             SET instance_id = ?3, cluster_port = ?4, join_date = ?5, health_check_date = ?6
             WHERE server = ?1 AND port = ?2",
            params![
                node.server,
                node.port,
                node.instance_id,
                node.cluster_port,
                to_db_time(&node.join_date),
                to_db_time(&node.health_check_date),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "cluster node",
                key: node.key().to_string(),
            });
        }
        Ok(())
    }

    /// Removing a node that is already gone is not an error.
    #[instrument(skip(self), fields(node = %key))]
    pub fn remove_cluster_node(&self, key: &NodeKey) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "DELETE FROM cluster_nodes WHERE server = ?1 AND port = ?2",
            params![key.server, key.port],
        )?;
        Ok(())
    }
}

impl ClusterStore for NodeRegistry {
    fn get_cluster_nodes(&self) -> cronwell_core::Result<Vec<ClusterNode>> {
        Ok(NodeRegistry::get_cluster_nodes(self)?)
    }

    fn get_cluster_node(&self, key: &NodeKey) -> cronwell_core::Result<Option<ClusterNode>> {
        Ok(NodeRegistry::get_cluster_node(self, key)?)
    }

    fn add_cluster_node(&self, node: &ClusterNode) -> cronwell_core::Result<()> {
        Ok(NodeRegistry::add_cluster_node(self, node)?)
    }

    fn update_cluster_node(&self, node: &ClusterNode) -> cronwell_core::Result<()> {
        Ok(NodeRegistry::update_cluster_node(self, node)?)
    }

    fn remove_cluster_node(&self, key: &NodeKey) -> cronwell_core::Result<()> {
        Ok(NodeRegistry::remove_cluster_node(self, key)?)
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClusterNode> {
    Ok(ClusterNode {
        server: row.get(0)?,
        port: row.get(1)?,
        instance_id: row.get(2)?,
        cluster_port: row.get(3)?,
        join_date: row_time(row, 4)?,
        health_check_date: row_time(row, 5)?,
    })
}
