//! 梯形图网络（network）及能流（power-flow）可视化求值。
//!
//! 每次 `evaluate` 都是纯重算：先复位全部块/连线状态，再从左母线（`x == 0`）出发深度优先传播。
//! 环路由 `evaluated` 标记打断（每个块每轮至多触发一次），不做拓扑排序：
//! 梯形图允许线圈交叉反馈。
//!
//! 沿（rising/falling/change）检测属于运行时字节码，不在此处推断；这里只显示当前已知位值。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::address::AddressResolver;
use super::codec::read_bool;
use super::model::ResolvedAddress;

pub type BlockId = String;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Contact,
    Coil,
    CoilSet,
    CoilRset,
}

impl BlockKind {
    /// `coil|coil_set|coil_rset` 仅在外部写入语义上不同（直接写/置位/复位），对能流透明。
    pub fn is_coil(self) -> bool {
        matches!(self, BlockKind::Coil | BlockKind::CoilSet | BlockKind::CoilRset)
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Normal,
    Rising,
    Falling,
    Change,
}

impl Trigger {
    pub fn is_momentary(self) -> bool {
        self != Trigger::Normal
    }
}

/// 单轮求值的瞬态状态，不持久化。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockState {
    pub active: bool,
    pub powered: bool,
    pub evaluated: bool,
    pub terminated_input: bool,
    pub terminated_output: bool,
    /// 符号解析缓存：`None` 表示尚未解析；`Some(None)` 表示已解析但地址未知。
    pub resolved: Option<Option<ResolvedAddress>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LadderBlock {
    pub id: BlockId,
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub symbol: String,
    #[serde(skip)]
    pub state: Option<BlockState>,
}

impl LadderBlock {
    pub fn new(id: &str, x: i32, y: i32, kind: BlockKind, symbol: &str) -> Self {
        Self {
            id: id.to_string(),
            x,
            y,
            kind,
            inverted: false,
            trigger: Trigger::Normal,
            symbol: symbol.to_string(),
            state: None,
        }
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// 符号名/地址变化后由编辑侧调用，下一轮求值时重新解析。
    pub fn invalidate_symbol(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.resolved = None;
        }
    }

    fn is_rail_contact(&self) -> bool {
        self.kind == BlockKind::Contact && self.x == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub powered: bool,
    pub evaluated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from: BlockId,
    pub to: BlockId,
    #[serde(skip)]
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            state: ConnectionState::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LadderNetwork {
    #[serde(default)]
    pub blocks: Vec<LadderBlock>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl LadderNetwork {
    pub fn block(&self, id: &str) -> Option<&LadderBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }

    pub fn state_of(&self, id: &str) -> Option<&BlockState> {
        self.block(id).and_then(|block| block.state.as_ref())
    }

    /// 拓扑或符号表变化后清空全部解析缓存。
    pub fn invalidate_symbols(&mut self) {
        for block in &mut self.blocks {
            block.invalidate_symbol();
        }
    }
}

pub struct LadderEvaluator<'r, 'm> {
    resolver: &'r AddressResolver<'r>,
    memory: &'m [u8],
}

impl<'r, 'm> LadderEvaluator<'r, 'm> {
    pub fn new(resolver: &'r AddressResolver<'r>, memory: &'m [u8]) -> Self {
        Self { resolver, memory }
    }

    /// 单轮求值：就地改写块/连线的瞬态状态，调用方随后读取 `.state`。
    pub fn evaluate(&self, network: &mut LadderNetwork) {
        self.reset(network);

        let index: HashMap<String, usize> = network
            .blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (block.id.clone(), i))
            .collect();

        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); network.blocks.len()];
        for (conn_index, connection) in network.connections.iter().enumerate() {
            // 悬空连线（端点不存在）直接忽略
            if let (Some(&from), Some(_)) = (index.get(&connection.from), index.get(&connection.to)) {
                outgoing[from].push(conn_index);
            }
        }

        for (i, block) in network.blocks.iter_mut().enumerate() {
            if let Some(state) = block.state.as_mut() {
                state.terminated_input = block.kind == BlockKind::Contact && block.x == 0;
                state.terminated_output = outgoing[i].is_empty();
            }
        }

        let rail: Vec<usize> = network
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.x == 0)
            .map(|(i, _)| i)
            .collect();

        let mut walk = Propagation {
            network,
            index: &index,
            outgoing: &outgoing,
        };
        for start in rail {
            walk.visit(start, true);
        }
    }

    fn reset(&self, network: &mut LadderNetwork) {
        for block in &mut network.blocks {
            let resolved = match block.state.as_ref().and_then(|state| state.resolved) {
                Some(cached) => cached,
                None => self.resolver.resolve(block.symbol.as_str()),
            };

            // 未解析符号按 active = false 处理（不受 inverted 影响），但仍参与遍历
            let active = resolved
                .map(|address| read_bool(self.memory, &address) ^ block.inverted)
                .unwrap_or(false);

            block.state = Some(BlockState {
                active,
                powered: block.is_rail_contact(),
                evaluated: false,
                terminated_input: false,
                terminated_output: false,
                resolved: Some(resolved),
            });
        }

        for connection in &mut network.connections {
            connection.state = ConnectionState::default();
        }
    }
}

struct Propagation<'n> {
    network: &'n mut LadderNetwork,
    index: &'n HashMap<String, usize>,
    outgoing: &'n [Vec<usize>],
}

impl Propagation<'_> {
    fn visit(&mut self, block_index: usize, is_first_call: bool) {
        let Some(block) = self.network.blocks.get_mut(block_index) else {
            return;
        };
        let kind = block.kind;
        let trigger = block.trigger;
        let Some(state) = block.state.as_mut() else {
            return;
        };

        if state.evaluated {
            return;
        }

        let fires = if kind.is_coil() {
            // 线圈不能直接挂在母线上作为起点
            if is_first_call {
                return;
            }
            state.powered = true;
            true
        } else {
            state.powered = true;
            state.active && !trigger.is_momentary()
        };

        if !fires {
            return;
        }
        state.evaluated = true;

        let outgoing = self.outgoing;
        let index = self.index;
        for &conn_index in &outgoing[block_index] {
            let connection = &mut self.network.connections[conn_index];
            connection.state.powered = true;
            connection.state.evaluated = true;

            if let Some(next) = index.get(&connection.to).copied() {
                self.visit(next, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::monitor::core::model::{
        MemoryRegion, ProjectDescriptor, RegionName, SemanticType, Symbol,
    };

    fn bit_symbol(name: &str, address: f64) -> Symbol {
        Symbol {
            name: name.to_string(),
            location: RegionName::Marker,
            data_type: SemanticType::Bit,
            address,
            initial_value: serde_json::Value::Null,
            comment: String::new(),
        }
    }

    fn project() -> ProjectDescriptor {
        let mut project = ProjectDescriptor::default();
        project
            .offsets
            .insert(RegionName::Marker, MemoryRegion { offset: 0, size: 64 });
        project.symbols = vec![
            bit_symbol("button1", 0.0),
            bit_symbol("button2", 0.1),
            bit_symbol("light1", 0.2),
        ];
        project
    }

    fn series_network() -> LadderNetwork {
        LadderNetwork {
            blocks: vec![
                LadderBlock::new("b1", 0, 0, BlockKind::Contact, "button1"),
                LadderBlock::new("b2", 1, 0, BlockKind::Contact, "button2"),
                LadderBlock::new("l1", 2, 0, BlockKind::Coil, "light1"),
            ],
            connections: vec![Connection::new("b1", "b2"), Connection::new("b2", "l1")],
        }
    }

    fn evaluate(project: &ProjectDescriptor, memory: &[u8], network: &mut LadderNetwork) {
        let resolver = AddressResolver::new(project);
        LadderEvaluator::new(&resolver, memory).evaluate(network);
    }

    #[test]
    fn series_contacts_power_the_coil_only_when_both_closed() {
        let project = project();

        let mut network = series_network();
        evaluate(&project, &[0b0000_0011], &mut network);
        let coil = network.state_of("l1").unwrap();
        assert!(coil.powered);
        assert!(coil.evaluated);
        assert!(network.connections.iter().all(|c| c.state.powered));

        for memory in [[0b0000_0001u8], [0b0000_0010u8], [0u8]] {
            let mut network = series_network();
            evaluate(&project, &memory, &mut network);
            assert!(!network.state_of("l1").unwrap().powered, "memory {memory:?}");
        }
    }

    #[test]
    fn open_contact_is_powered_but_does_not_conduct() {
        let project = project();
        let mut network = series_network();
        evaluate(&project, &[0b0000_0001], &mut network);

        let b2 = network.state_of("b2").unwrap();
        assert!(b2.powered);
        assert!(!b2.active);
        assert!(!b2.evaluated);
        assert!(network.connections[0].state.powered);
        assert!(!network.connections[1].state.powered);
    }

    #[test]
    fn inverted_contact_is_active_on_zero() {
        let project = project();
        let mut network = LadderNetwork {
            blocks: vec![
                LadderBlock::new("b1", 0, 0, BlockKind::Contact, "button1").inverted(true),
                LadderBlock::new("l1", 1, 0, BlockKind::CoilSet, "light1"),
            ],
            connections: vec![Connection::new("b1", "l1")],
        };

        evaluate(&project, &[0], &mut network);
        assert!(network.state_of("b1").unwrap().active);
        assert!(network.state_of("l1").unwrap().powered);
    }

    #[test]
    fn boundary_ticks_are_marked() {
        let project = project();
        let mut network = series_network();
        evaluate(&project, &[0], &mut network);

        let b1 = network.state_of("b1").unwrap();
        assert!(b1.terminated_input);
        assert!(!b1.terminated_output);
        assert!(b1.powered);

        let l1 = network.state_of("l1").unwrap();
        assert!(!l1.terminated_input);
        assert!(l1.terminated_output);
    }

    #[test]
    fn cycles_terminate_and_each_block_fires_once() {
        let project = project();
        let mut network = series_network();
        network.connections.push(Connection::new("l1", "b1"));
        network.connections.push(Connection::new("b2", "b2"));

        evaluate(&project, &[0b0000_0011], &mut network);
        assert!(network.blocks.iter().all(|b| b.state.as_ref().unwrap().evaluated));
    }

    #[test]
    fn coil_on_the_rail_does_not_start_propagation() {
        let project = project();
        let mut network = LadderNetwork {
            blocks: vec![
                LadderBlock::new("l0", 0, 0, BlockKind::Coil, "light1"),
                LadderBlock::new("b2", 1, 0, BlockKind::Contact, "button2"),
            ],
            connections: vec![Connection::new("l0", "b2")],
        };

        evaluate(&project, &[0xFF], &mut network);
        assert!(!network.state_of("l0").unwrap().powered);
        assert!(!network.state_of("b2").unwrap().powered);
    }

    #[test]
    fn momentary_contacts_do_not_conduct_in_visual_pass() {
        let project = project();
        let mut network = series_network();
        network.blocks[1] = network.blocks[1].clone().with_trigger(Trigger::Rising);

        evaluate(&project, &[0b0000_0011], &mut network);
        let b2 = network.state_of("b2").unwrap();
        assert!(b2.active);
        assert!(b2.powered);
        assert!(!network.state_of("l1").unwrap().powered);
    }

    #[test]
    fn unresolved_symbols_and_dangling_wires_are_tolerated() {
        let project = project();
        let mut network = LadderNetwork {
            blocks: vec![
                LadderBlock::new("b1", 0, 0, BlockKind::Contact, "missing").inverted(true),
                LadderBlock::new("l1", 1, 0, BlockKind::Coil, "also_missing"),
            ],
            connections: vec![Connection::new("b1", "l1"), Connection::new("b1", "ghost")],
        };

        evaluate(&project, &[0], &mut network);
        let b1 = network.state_of("b1").unwrap();
        assert_eq!(b1.resolved, Some(None));
        assert!(b1.powered);
        assert!(!b1.active);
        assert!(!b1.evaluated);
        let l1 = network.state_of("l1").unwrap();
        assert!(!l1.powered);
        assert!(!l1.evaluated);
        assert!(!network.connections[0].state.powered);
        assert!(!network.connections[1].state.powered);
    }

    #[test]
    fn inverted_contact_on_unknown_symbol_stays_open() {
        let project = ProjectDescriptor::default();
        let mut network = LadderNetwork {
            blocks: vec![
                LadderBlock::new("b1", 0, 0, BlockKind::Contact, "typo_symbol").inverted(true),
                LadderBlock::new("l1", 1, 0, BlockKind::Coil, "light1"),
            ],
            connections: vec![Connection::new("b1", "l1")],
        };

        evaluate(&project, &[0; 4], &mut network);
        assert!(!network.state_of("b1").unwrap().active);
        assert!(!network.state_of("l1").unwrap().powered);
    }

    #[test]
    fn resolution_is_cached_until_invalidated() {
        let mut project = project();
        let mut network = series_network();
        evaluate(&project, &[0b0000_0011], &mut network);
        assert!(network.state_of("l1").unwrap().powered);

        // 符号被移到另一字节：缓存仍指向旧地址
        project.symbols[0].address = 1.0;
        evaluate(&project, &[0b0000_0011, 0], &mut network);
        assert!(network.state_of("l1").unwrap().powered);

        network.invalidate_symbols();
        evaluate(&project, &[0b0000_0011, 0], &mut network);
        assert!(!network.state_of("l1").unwrap().powered);
    }
}
