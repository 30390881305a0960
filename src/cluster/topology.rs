//! Cluster topology cache: an immutable snapshot of nodes and slot
//! ownership, built by parsing `CLUSTER NODES` text or a `CLUSTER SLOTS`
//! reply.
use crate::cluster::slot::SLOT_COUNT;
use crate::error::{RedisError, RedisResult};
use crate::resp::Frame;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub id: String,
    pub endpoint: SocketAddr,
    pub flags: HashSet<String>,
    pub primary_id: Option<String>,
    pub slots: Vec<(u16, u16)>,
    pub link_state: String,
}

impl NodeDescriptor {
    pub fn is_primary(&self) -> bool {
        self.flags.contains("master") || self.flags.contains("primary")
    }

    pub fn is_replica(&self) -> bool {
        self.flags.contains("slave") || self.flags.contains("replica")
    }

    pub fn is_myself(&self) -> bool {
        self.flags.contains("myself")
    }
}

/// Immutable view of cluster nodes and slot ownership at a given epoch
///. Refreshing produces a new snapshot; the router swaps it in
/// atomically via `arc_swap`.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    pub epoch: u64,
    pub nodes: Vec<NodeDescriptor>,
    slot_primary: Vec<Option<usize>>,
    replicas_by_primary: HashMap<String, Vec<usize>>,
}

impl TopologySnapshot {
    pub fn empty() -> TopologySnapshot {
        TopologySnapshot {
            epoch: 0,
            nodes: Vec::new(),
            slot_primary: vec![None; SLOT_COUNT as usize],
            replicas_by_primary: HashMap::new(),
        }
    }

    pub fn primary_for_slot(&self, slot: u16) -> Option<&NodeDescriptor> {
        self.slot_primary[slot as usize].map(|idx| &self.nodes[idx])
    }

    pub fn replicas_for_primary(&self, primary_id: &str) -> Vec<&NodeDescriptor> {
        self.replicas_by_primary
            .get(primary_id)
            .map(|idxs| idxs.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Copy-on-write update applied after a MOVED redirect: future dispatches for `slot` go straight to `addr`
    /// without another MOVED, until the next topology refresh.
    pub fn with_moved(&self, slot: u16, addr: SocketAddr) -> TopologySnapshot {
        let mut nodes = self.nodes.clone();
        let mut slot_primary = self.slot_primary.clone();
        let idx = match nodes.iter().position(|n| n.endpoint == addr) {
            Some(i) => i,
            None => {
                nodes.push(NodeDescriptor {
                    id: format!("moved:{}", addr),
                    endpoint: addr,
                    flags: HashSet::from(["master".to_string()]),
                    primary_id: None,
                    slots: Vec::new(),
                    link_state: "connected".to_string(),
                });
                nodes.len() - 1
            }
        };
        slot_primary[slot as usize] = Some(idx);
        TopologySnapshot {
            epoch: self.epoch + 1,
            nodes,
            slot_primary,
            replicas_by_primary: self.replicas_by_primary.clone(),
        }
    }

    /// Parses `CLUSTER NODES` output: one space-separated line per node
    ///. Unrecognized trailing fields (importing/migrating slot
    /// markers) are skipped rather than rejected.
    pub fn parse_cluster_nodes(text: &str, epoch: u64) -> RedisResult<TopologySnapshot> {
        let mut nodes = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                continue;
            }
            let id = fields[0].to_string();
            let host_port = fields[1].split('@').next().unwrap_or(fields[1]);
            let endpoint: SocketAddr = host_port
                .parse()
                .map_err(|_| RedisError::ProtocolViolation(format!("bad node address: {}", host_port)))?;
            let flags: HashSet<String> = fields[2].split(',').map(str::to_string).collect();
            let primary_id = if fields[3] == "-" {
                None
            } else {
                Some(fields[3].to_string())
            };
            let link_state = fields[7].to_string();
            let mut slots = Vec::new();
            for tok in &fields[8..] {
                if tok.starts_with('[') {
                    continue;
                }
                if let Some((s, e)) = tok.split_once('-') {
                    if let (Ok(s), Ok(e)) = (s.parse(), e.parse()) {
                        slots.push((s, e));
                    }
                } else if let Ok(s) = tok.parse::<u16>() {
                    slots.push((s, s));
                }
            }
            nodes.push(NodeDescriptor {
                id,
                endpoint,
                flags,
                primary_id,
                slots,
                link_state,
            });
        }
        Ok(Self::from_nodes(nodes, epoch))
    }

    /// Parses a `CLUSTER SLOTS` reply: an array of
    /// `[start, end, [host, port, id], replica..., ...]` entries.
    pub fn parse_cluster_slots(frame: &Frame, epoch: u64) -> RedisResult<TopologySnapshot> {
        let entries = frame
            .elements()
            .ok_or_else(|| RedisError::ProtocolViolation("CLUSTER SLOTS reply was not an array".into()))?;

        let mut nodes: Vec<NodeDescriptor> = Vec::new();
        let mut node_index: HashMap<SocketAddr, usize> = HashMap::new();
        let mut slot_primary = vec![None; SLOT_COUNT as usize];
        let mut replicas_by_primary: HashMap<String, Vec<usize>> = HashMap::new();

        for entry in entries {
            let fields = entry
                .elements()
                .ok_or_else(|| RedisError::ProtocolViolation("CLUSTER SLOTS entry was not an array".into()))?;
            if fields.len() < 3 {
                continue;
            }
            let start = as_i64(&fields[0])? as u16;
            let end = as_i64(&fields[1])? as u16;

            let master_idx = upsert_node(
                &mut nodes,
                &mut node_index,
                &fields[2],
                true,
                Some((start, end)),
            )?;
            for slot in start..=end {
                slot_primary[slot as usize] = Some(master_idx);
            }

            for replica_field in &fields[3..] {
                let replica_idx = upsert_node(&mut nodes, &mut node_index, replica_field, false, None)?;
                let primary_id = nodes[master_idx].id.clone();
                nodes[replica_idx].primary_id = Some(primary_id.clone());
                replicas_by_primary.entry(primary_id).or_default().push(replica_idx);
            }
        }

        Ok(TopologySnapshot {
            epoch,
            nodes,
            slot_primary,
            replicas_by_primary,
        })
    }

    fn from_nodes(nodes: Vec<NodeDescriptor>, epoch: u64) -> TopologySnapshot {
        let mut slot_primary = vec![None; SLOT_COUNT as usize];
        let mut replicas_by_primary: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, n) in nodes.iter().enumerate() {
            if n.is_primary() {
                for &(s, e) in &n.slots {
                    for slot in s..=e {
                        slot_primary[slot as usize] = Some(idx);
                    }
                }
            } else if n.is_replica() {
                if let Some(pid) = &n.primary_id {
                    replicas_by_primary.entry(pid.clone()).or_default().push(idx);
                }
            }
        }
        TopologySnapshot {
            epoch,
            nodes,
            slot_primary,
            replicas_by_primary,
        }
    }
}

fn upsert_node(
    nodes: &mut Vec<NodeDescriptor>,
    index: &mut HashMap<SocketAddr, usize>,
    desc: &Frame,
    is_master: bool,
    slot_range: Option<(u16, u16)>,
) -> RedisResult<usize> {
    let fields = desc
        .elements()
        .ok_or_else(|| RedisError::ProtocolViolation("CLUSTER SLOTS node entry was not an array".into()))?;
    if fields.len() < 2 {
        return Err(RedisError::ProtocolViolation(
            "CLUSTER SLOTS node entry missing host/port".into(),
        ));
    }
    let host = as_string(&fields[0])?;
    let port = as_i64(&fields[1])? as u16;
    let id = fields
        .get(2)
        .and_then(Frame::as_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|_| RedisError::ProtocolViolation(format!("bad node address: {}:{}", host, port)))?;

    if let Some(&idx) = index.get(&addr) {
        if let Some((s, e)) = slot_range {
            nodes[idx].slots.push((s, e));
        }
        return Ok(idx);
    }

    let mut flags = HashSet::new();
    flags.insert(if is_master { "master" } else { "slave" }.to_string());
    nodes.push(NodeDescriptor {
        id,
        endpoint: addr,
        flags,
        primary_id: None,
        slots: slot_range.into_iter().collect(),
        link_state: "connected".to_string(),
    });
    let idx = nodes.len() - 1;
    index.insert(addr, idx);
    Ok(idx)
}

fn as_i64(frame: &Frame) -> RedisResult<i64> {
    match frame {
        Frame::Integer(i) => Ok(*i),
        other => Err(RedisError::ProtocolViolation(format!(
            "expected integer field, got {:?}",
            other
        ))),
    }
}

fn as_string(frame: &Frame) -> RedisResult<String> {
    frame
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| RedisError::ProtocolViolation("expected string field".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn parses_cluster_nodes_text() {
        let text = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
";
        let snap = TopologySnapshot::parse_cluster_nodes(text, 1).unwrap();
        assert_eq!(snap.nodes.len(), 2);
        let primary = snap.primary_for_slot(0).unwrap();
        assert_eq!(primary.endpoint.port(), 30001);
        assert!(primary.is_myself());
        let replicas = snap.replicas_for_primary(&primary.id);
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].endpoint.port(), 30004);
    }

    #[test]
    fn parses_cluster_slots_reply() {
        let frame = Frame::Array(vec![Frame::Array(vec![
            Frame::Integer(0),
            Frame::Integer(5460),
            Frame::Array(vec![
                Frame::bulk_string(Bytes::from_static(b"127.0.0.1")),
                Frame::Integer(30001),
                Frame::bulk_string(Bytes::from_static(b"nodeid1")),
            ]),
            Frame::Array(vec![
                Frame::bulk_string(Bytes::from_static(b"127.0.0.1")),
                Frame::Integer(30004),
                Frame::bulk_string(Bytes::from_static(b"nodeid2")),
            ]),
        ])]);
        let snap = TopologySnapshot::parse_cluster_slots(&frame, 1).unwrap();
        let primary = snap.primary_for_slot(1649).unwrap();
        assert_eq!(primary.endpoint.port(), 30001);
        assert_eq!(snap.replicas_for_primary(&primary.id).len(), 1);
    }

    #[test]
    fn with_moved_redirects_future_lookups_without_disturbing_other_slots() {
        let snap = TopologySnapshot::empty();
        let addr: SocketAddr = "10.0.0.2:6379".parse().unwrap();
        let next = snap.with_moved(1649, addr);
        assert_eq!(next.primary_for_slot(1649).unwrap().endpoint, addr);
        assert!(next.primary_for_slot(1).is_none());
        assert_eq!(next.epoch, snap.epoch + 1);
    }
}
