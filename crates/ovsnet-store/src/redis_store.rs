//! Redis store backend.
//!
//! Layout, one Redis key per table:
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `PORT_BINDING` | hash | port id → JSON [`PortBinding`] |
//! | `PORT_STATUS` | hash | port id → `UP` / `DOWN` |
//! | `VLAN_BINDING` | hash | network id → tag |
//! | `TUNNEL_KEY` | hash | network id → key |
//! | `TUNNEL_KEY_INDEX` | hash | key → network id |
//! | `TUNNEL_KEY_LAST` | list | cursor rows |
//! | `TUNNEL_KEY_VERSION` | string | commit counter |
//! | `HOST_NODE` | hash | dpid → JSON [`HostNode`] |
//! | `TUNNEL_PORT_REQUEST` | set | `low|high` dpid pairs |
//! | `CONTROLLER_SERVER` | hash | kind → address |
//!
//! Tunnel-key commits and deletes run as Lua scripts so that the version
//! check, the cursor update and the writes are one atomic step.

use async_trait::async_trait;
use ovsnet_common::{OvsNetError, OvsNetResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

use crate::models::{
    ControllerServer, HostNode, HostPair, PortBinding, PortStatus, ServerKind, TunnelKeyBinding,
    TunnelKeySnapshot, VlanBinding,
};
use crate::store::{tables, NetStore};

const COMMIT_TUNNEL_KEY_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current ~= tonumber(ARGV[1]) then
    return 0
end
if redis.call('HEXISTS', KEYS[3], ARGV[3]) == 1 then
    return 0
end
if redis.call('HEXISTS', KEYS[2], ARGV[2]) == 1 then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
redis.call('HSET', KEYS[3], ARGV[3], ARGV[2])
redis.call('DEL', KEYS[4])
redis.call('RPUSH', KEYS[4], ARGV[4])
redis.call('INCR', KEYS[1])
return 1
"#;

const DELETE_TUNNEL_KEY_SCRIPT: &str = r#"
local key = redis.call('HGET', KEYS[1], ARGV[1])
if not key then
    return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], key)
local freed = tonumber(key)
local last = nil
for _, row in ipairs(redis.call('LRANGE', KEYS[4], 0, -1)) do
    local n = tonumber(row)
    if last == nil or n > last then
        last = n
    end
end
if last ~= nil and last >= freed then
    redis.call('DEL', KEYS[4])
    redis.call('RPUSH', KEYS[4], freed - 1)
end
redis.call('INCR', KEYS[3])
return 1
"#;

fn unavailable(operation: &'static str) -> impl FnOnce(RedisError) -> OvsNetError {
    move |e| OvsNetError::store(operation, e.to_string())
}

fn decode<T: DeserializeOwned>(table: &str, key: &str, raw: &str) -> OvsNetResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| OvsNetError::internal(format!("corrupt {} row {}: {}", table, key, e)))
}

fn encode<T: serde::Serialize>(value: &T) -> OvsNetResult<String> {
    serde_json::to_string(value).map_err(|e| OvsNetError::internal(e.to_string()))
}

/// [`NetStore`] backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    commit_script: Script,
    delete_key_script: Script,
}

impl RedisStore {
    /// Connects to Redis at `url` (`redis://host:port/db`).
    #[instrument]
    pub async fn connect(url: &str) -> OvsNetResult<Self> {
        debug!(url, "Connecting to Redis store");
        let client = Client::open(url).map_err(unavailable("connect"))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(unavailable("connect"))?;
        Ok(Self::from_manager(conn))
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            commit_script: Script::new(COMMIT_TUNNEL_KEY_SCRIPT),
            delete_key_script: Script::new(DELETE_TUNNEL_KEY_SCRIPT),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl NetStore for RedisStore {
    async fn list_port_bindings(&self) -> OvsNetResult<Vec<PortBinding>> {
        let rows: HashMap<String, String> = self
            .conn()
            .hgetall(tables::PORT_BINDING)
            .await
            .map_err(unavailable("list_port_bindings"))?;
        rows.iter()
            .map(|(k, v)| decode(tables::PORT_BINDING, k, v))
            .collect()
    }

    async fn get_port_binding(&self, port_id: &str) -> OvsNetResult<Option<PortBinding>> {
        let raw: Option<String> = self
            .conn()
            .hget(tables::PORT_BINDING, port_id)
            .await
            .map_err(unavailable("get_port_binding"))?;
        raw.map(|r| decode(tables::PORT_BINDING, port_id, &r))
            .transpose()
    }

    async fn put_port_binding(&self, binding: &PortBinding) -> OvsNetResult<()> {
        let raw = encode(binding)?;
        let _: () = self
            .conn()
            .hset(tables::PORT_BINDING, &binding.port_id, raw)
            .await
            .map_err(unavailable("put_port_binding"))?;
        Ok(())
    }

    async fn delete_port_binding(&self, port_id: &str) -> OvsNetResult<bool> {
        let removed: i64 = self
            .conn()
            .hdel(tables::PORT_BINDING, port_id)
            .await
            .map_err(unavailable("delete_port_binding"))?;
        Ok(removed > 0)
    }

    async fn set_port_status(&self, port_id: &str, status: PortStatus) -> OvsNetResult<()> {
        let _: () = self
            .conn()
            .hset(tables::PORT_STATUS, port_id, status.as_str())
            .await
            .map_err(unavailable("set_port_status"))?;
        Ok(())
    }

    async fn get_port_status(&self, port_id: &str) -> OvsNetResult<Option<PortStatus>> {
        let raw: Option<String> = self
            .conn()
            .hget(tables::PORT_STATUS, port_id)
            .await
            .map_err(unavailable("get_port_status"))?;
        Ok(raw.as_deref().and_then(PortStatus::parse))
    }

    async fn list_port_statuses(&self) -> OvsNetResult<HashMap<String, PortStatus>> {
        let rows: HashMap<String, String> = self
            .conn()
            .hgetall(tables::PORT_STATUS)
            .await
            .map_err(unavailable("list_port_statuses"))?;
        Ok(rows
            .into_iter()
            .filter_map(|(k, v)| PortStatus::parse(&v).map(|s| (k, s)))
            .collect())
    }

    async fn list_vlan_bindings(&self) -> OvsNetResult<Vec<VlanBinding>> {
        let rows: HashMap<String, u16> = self
            .conn()
            .hgetall(tables::VLAN_BINDING)
            .await
            .map_err(unavailable("list_vlan_bindings"))?;
        Ok(rows
            .into_iter()
            .map(|(network_id, vlan_tag)| VlanBinding {
                vlan_tag,
                network_id,
            })
            .collect())
    }

    async fn put_vlan_binding(&self, binding: &VlanBinding) -> OvsNetResult<()> {
        let _: () = self
            .conn()
            .hset(tables::VLAN_BINDING, &binding.network_id, binding.vlan_tag)
            .await
            .map_err(unavailable("put_vlan_binding"))?;
        Ok(())
    }

    async fn delete_vlan_binding(&self, network_id: &str) -> OvsNetResult<bool> {
        let removed: i64 = self
            .conn()
            .hdel(tables::VLAN_BINDING, network_id)
            .await
            .map_err(unavailable("delete_vlan_binding"))?;
        Ok(removed > 0)
    }

    async fn list_tunnel_keys(&self) -> OvsNetResult<Vec<TunnelKeyBinding>> {
        let rows: HashMap<String, u32> = self
            .conn()
            .hgetall(tables::TUNNEL_KEY)
            .await
            .map_err(unavailable("list_tunnel_keys"))?;
        Ok(rows
            .into_iter()
            .map(|(network_id, tunnel_key)| TunnelKeyBinding {
                network_id,
                tunnel_key,
            })
            .collect())
    }

    async fn get_tunnel_key(&self, network_id: &str) -> OvsNetResult<Option<u32>> {
        self.conn()
            .hget(tables::TUNNEL_KEY, network_id)
            .await
            .map_err(unavailable("get_tunnel_key"))
    }

    #[instrument(skip(self))]
    async fn delete_tunnel_key(&self, network_id: &str) -> OvsNetResult<bool> {
        let removed: i64 = self
            .delete_key_script
            .key(tables::TUNNEL_KEY)
            .key(tables::TUNNEL_KEY_INDEX)
            .key(tables::TUNNEL_KEY_VERSION)
            .key(tables::TUNNEL_KEY_LAST)
            .arg(network_id)
            .invoke_async(&mut self.conn())
            .await
            .map_err(unavailable("delete_tunnel_key"))?;
        Ok(removed > 0)
    }

    async fn tunnel_key_snapshot(&self) -> OvsNetResult<TunnelKeySnapshot> {
        let mut conn = self.conn();
        // Version first: anything committed after this read moves it.
        let version: Option<u64> = conn
            .get(tables::TUNNEL_KEY_VERSION)
            .await
            .map_err(unavailable("tunnel_key_snapshot"))?;
        let cursors: Vec<u32> = conn
            .lrange(tables::TUNNEL_KEY_LAST, 0, -1)
            .await
            .map_err(unavailable("tunnel_key_snapshot"))?;
        let rows: HashMap<String, u32> = conn
            .hgetall(tables::TUNNEL_KEY)
            .await
            .map_err(unavailable("tunnel_key_snapshot"))?;

        Ok(TunnelKeySnapshot {
            cursors,
            allocated: rows
                .into_iter()
                .map(|(network_id, tunnel_key)| TunnelKeyBinding {
                    network_id,
                    tunnel_key,
                })
                .collect(),
            version: version.unwrap_or(0),
        })
    }

    #[instrument(skip(self, binding), fields(network_id = %binding.network_id, key = binding.tunnel_key))]
    async fn commit_tunnel_key(
        &self,
        version: u64,
        binding: &TunnelKeyBinding,
        cursor: u32,
    ) -> OvsNetResult<()> {
        let committed: i64 = self
            .commit_script
            .key(tables::TUNNEL_KEY_VERSION)
            .key(tables::TUNNEL_KEY)
            .key(tables::TUNNEL_KEY_INDEX)
            .key(tables::TUNNEL_KEY_LAST)
            .arg(version)
            .arg(&binding.network_id)
            .arg(binding.tunnel_key)
            .arg(cursor)
            .invoke_async(&mut self.conn())
            .await
            .map_err(unavailable("commit_tunnel_key"))?;

        if committed == 1 {
            debug!("Tunnel key committed");
            Ok(())
        } else {
            Err(OvsNetError::conflict(tables::TUNNEL_KEY))
        }
    }

    async fn list_host_nodes(&self) -> OvsNetResult<Vec<HostNode>> {
        let rows: HashMap<String, String> = self
            .conn()
            .hgetall(tables::HOST_NODE)
            .await
            .map_err(unavailable("list_host_nodes"))?;
        rows.iter()
            .map(|(k, v)| decode(tables::HOST_NODE, k, v))
            .collect()
    }

    async fn put_host_node(&self, node: &HostNode) -> OvsNetResult<()> {
        let raw = encode(node)?;
        let _: () = self
            .conn()
            .hset(tables::HOST_NODE, &node.dpid, raw)
            .await
            .map_err(unavailable("put_host_node"))?;
        Ok(())
    }

    async fn delete_host_node(&self, dpid: &str) -> OvsNetResult<bool> {
        let removed: i64 = self
            .conn()
            .hdel(tables::HOST_NODE, dpid)
            .await
            .map_err(unavailable("delete_host_node"))?;
        Ok(removed > 0)
    }

    async fn list_tunnel_requests(&self) -> OvsNetResult<BTreeSet<HostPair>> {
        let members: Vec<String> = self
            .conn()
            .smembers(tables::TUNNEL_PORT_REQUEST)
            .await
            .map_err(unavailable("list_tunnel_requests"))?;
        Ok(members.iter().filter_map(|m| HostPair::from_key(m)).collect())
    }

    async fn add_tunnel_request(&self, pair: &HostPair) -> OvsNetResult<bool> {
        let added: i64 = self
            .conn()
            .sadd(tables::TUNNEL_PORT_REQUEST, pair.to_key())
            .await
            .map_err(unavailable("add_tunnel_request"))?;
        Ok(added > 0)
    }

    async fn remove_tunnel_request(&self, pair: &HostPair) -> OvsNetResult<bool> {
        let removed: i64 = self
            .conn()
            .srem(tables::TUNNEL_PORT_REQUEST, pair.to_key())
            .await
            .map_err(unavailable("remove_tunnel_request"))?;
        Ok(removed > 0)
    }

    async fn replace_tunnel_requests(&self, pairs: &BTreeSet<HostPair>) -> OvsNetResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(tables::TUNNEL_PORT_REQUEST).ignore();
        if !pairs.is_empty() {
            let keys: Vec<String> = pairs.iter().map(HostPair::to_key).collect();
            pipe.sadd(tables::TUNNEL_PORT_REQUEST, keys).ignore();
        }
        let _: () = pipe
            .query_async(&mut self.conn())
            .await
            .map_err(unavailable("replace_tunnel_requests"))?;
        debug!(count = pairs.len(), "Replaced tunnel port requests");
        Ok(())
    }

    async fn set_controller_server(&self, server: &ControllerServer) -> OvsNetResult<()> {
        let _: () = self
            .conn()
            .hset(tables::CONTROLLER_SERVER, server.kind.as_str(), &server.address)
            .await
            .map_err(unavailable("set_controller_server"))?;
        Ok(())
    }

    async fn list_controller_servers(&self) -> OvsNetResult<Vec<ControllerServer>> {
        let rows: HashMap<String, String> = self
            .conn()
            .hgetall(tables::CONTROLLER_SERVER)
            .await
            .map_err(unavailable("list_controller_servers"))?;
        let mut servers: Vec<ControllerServer> = rows
            .into_iter()
            .filter_map(|(kind, address)| {
                ServerKind::parse(&kind).map(|kind| ControllerServer { kind, address })
            })
            .collect();
        servers.sort_by_key(|s| s.kind);
        Ok(servers)
    }
}
