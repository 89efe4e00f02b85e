//! ModSynth: a user-patchable graph of unit generators.
//!
//! The graph is an arena of nodes, an evaluation-order vector and, for each
//! node, the list of edges leaving it. Node types live in [`units`]; the
//! shared unit contract is in [`node`].

/// Unit contract, inputs and edge timing.
pub mod node;
/// The unit registry.
pub mod units;

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, warn};

use crate::{dsp::context::SynthContext, patch::Element};

pub use node::{InputDef, Inputs, ModUnit, NoteInfo, When};
pub use units::{create_unit, UNIT_TYPES};

/*
Evaluation
==========

    @sr @frq @vol @pitch @dur │ user units, in order │ out
    └──────── head ───────────┘                      └ tail

`out` sums its `in` edges and scales by `vol`. Its `pan` input is unset
(NaN) by default and the voice stays mono; set or connect it and the voice
writes a panned stereo pair instead.

Every tick walks the order vector once. Each node ticks, its accumulating
inputs are cleared, and then its GEN edges deliver the new sample:

    accumulating input   dst.in += value    (summed, cleared after dst ticks)
    ordinary input       dst.in  = value    (kept until overwritten)

So an edge from A to B where A sits before B is seen by B in the same tick.
If B sits before A, B has already ticked and sees the value one tick late.
That is how feedback is written; there is no cycle detection.

At note start the `@` nodes take the note's values, then the walk runs once
more calling `start` on every unit and delivering INIT edges. INIT edges
always assign, so a start-time value lands in the input's base setting.

Addressing
----------

Units get the lowest free ID when added, and keep it through reordering
and save/load. A parameter is `unit_id << 8 | input_index`; the name form
is `unit.input`. IDs run 1..=127, so at most 127 units (the `@` nodes
included) fit in a graph. A removed unit's ID goes to the next unit added.
*/

/// Note values the graph exposes as `PARAM` nodes at its head.
pub const INTERNAL_NODES: [&str; 5] = ["@sr", "@frq", "@vol", "@pitch", "@dur"];
pub const OUT_NODE: &str = "out";
pub const MAX_UNITS: usize = 127;

const OUT_ID: u8 = INTERNAL_NODES.len() as u8 + 1;
const MAX_ID: u8 = MAX_UNITS as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    dst: NodeHandle,
    input: usize,
    accumulate: bool,
    when: When,
}

#[derive(Debug, Clone)]
struct Node {
    id: u8,
    name: String,
    internal: bool,
    unit: Box<dyn ModUnit>,
}

/// One connection, as listed by [`ModGraph::connections`].
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub src: String,
    pub dst: String,
    pub input: String,
    pub when: When,
}

#[derive(Debug, Clone)]
pub struct ModGraph {
    ctx: Arc<SynthContext>,
    nodes: Vec<Option<Node>>,
    edges: Vec<Vec<Edge>>,
    order: Vec<NodeHandle>,
    out: NodeHandle,
    stopped: bool,
}

impl ModGraph {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let mut graph = Self {
            ctx,
            nodes: Vec::new(),
            edges: Vec::new(),
            order: Vec::new(),
            out: NodeHandle(0),
            stopped: false,
        };
        for name in INTERNAL_NODES {
            let unit = units::create_unit("PARAM", &graph.ctx);
            if let Some(h) = unit.and_then(|u| graph.insert(name, u, true, None)) {
                graph.order.push(h);
            }
        }
        let out = units::create_unit("OUT", &graph.ctx).and_then(|u| graph.insert(OUT_NODE, u, false, None));
        if let Some(h) = out {
            graph.out = h;
            graph.order.push(h);
        }
        graph
    }

    pub fn context(&self) -> &Arc<SynthContext> {
        &self.ctx
    }

    fn id_taken(&self, id: u8) -> bool {
        self.nodes.iter().flatten().any(|n| n.id == id)
    }

    /// `wanted` when it is in range and free, else the lowest free ID.
    fn allocate_id(&self, wanted: Option<u8>) -> Option<u8> {
        match wanted {
            Some(id) if (1..=MAX_ID).contains(&id) && !self.id_taken(id) => Some(id),
            _ => (1..=MAX_ID).find(|&id| !self.id_taken(id)),
        }
    }

    /// Store a node in the first empty slot. `None` when no ID is left.
    fn insert(&mut self, name: &str, unit: Box<dyn ModUnit>, internal: bool, id: Option<u8>) -> Option<NodeHandle> {
        let id = self.allocate_id(id)?;
        let node = Node {
            id,
            name: name.to_string(),
            internal,
            unit,
        };
        let h = match self.nodes.iter().position(Option::is_none) {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                self.edges[slot].clear();
                NodeHandle(slot)
            }
            None => {
                self.nodes.push(Some(node));
                self.edges.push(Vec::new());
                NodeHandle(self.nodes.len() - 1)
            }
        };
        Some(h)
    }

    fn node(&self, h: NodeHandle) -> Option<&Node> {
        self.nodes.get(h.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, h: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(h.0).and_then(Option::as_mut)
    }

    /// Handle of a node by name, including the `@` nodes and `out`.
    pub fn handle(&self, name: &str) -> Option<NodeHandle> {
        self.order
            .iter()
            .copied()
            .find(|&h| self.node(h).is_some_and(|n| n.name == name))
    }

    fn handle_by_id(&self, id: u8) -> Option<NodeHandle> {
        self.order.iter().copied().find(|&h| self.node(h).is_some_and(|n| n.id == id))
    }

    /// Resolve `unit.input` to a node and input index.
    fn resolve(&self, spec: &str) -> Option<(NodeHandle, usize)> {
        let (unit, input) = spec.rsplit_once('.')?;
        let h = self.handle(unit)?;
        let index = self.node(h)?.unit.input_index(input)?;
        Some((h, index))
    }

    /// Add a unit just before `out`. `None` when the type is unknown, the
    /// name is taken or malformed, or the graph is full.
    pub fn add_unit(&mut self, type_name: &str, name: &str) -> Option<NodeHandle> {
        self.add_unit_with_id(type_name, name, None)
    }

    /// `add_unit` keeping a saved ID when it is still free.
    fn add_unit_with_id(&mut self, type_name: &str, name: &str, id: Option<u8>) -> Option<NodeHandle> {
        if name.is_empty() || name.contains('.') || name.starts_with('@') || self.handle(name).is_some() {
            warn!(name, "invalid or duplicate unit name");
            return None;
        }
        let Some(unit) = units::create_unit(type_name, &self.ctx) else {
            warn!(type_name, name, "unknown unit type");
            return None;
        };
        let Some(h) = self.insert(name, unit, false, id) else {
            warn!(name, "graph is full");
            return None;
        };
        let tail = self.order.len().saturating_sub(1);
        self.order.insert(tail, h);
        debug!(type_name, name, "unit added");
        Some(h)
    }

    /// Remove a user unit and every edge into or out of it.
    pub fn remove_unit(&mut self, name: &str) -> bool {
        let Some(h) = self.handle(name) else {
            warn!(name, "no such unit");
            return false;
        };
        if h == self.out || self.node(h).is_some_and(|n| n.internal) {
            warn!(name, "built-in nodes cannot be removed");
            return false;
        }
        self.nodes[h.0] = None;
        self.edges[h.0].clear();
        for list in &mut self.edges {
            list.retain(|e| e.dst != h);
        }
        self.order.retain(|&o| o != h);
        debug!(name, "unit removed");
        true
    }

    /// Move `name` so it is evaluated just before `before`.
    pub fn move_before(&mut self, name: &str, before: &str) -> bool {
        let (Some(h), Some(b)) = (self.handle(name), self.handle(before)) else {
            warn!(name, before, "no such unit");
            return false;
        };
        let movable = |g: &Self, h: NodeHandle| h != g.out && g.node(h).is_some_and(|n| !n.internal);
        let target_ok = b == self.out || movable(self, b);
        if h == b || !movable(self, h) || !target_ok {
            warn!(name, before, "cannot reorder");
            return false;
        }
        self.order.retain(|&o| o != h);
        let at = self.order.iter().position(|&o| o == b).unwrap_or(self.order.len());
        self.order.insert(at, h);
        debug!(name, before, "unit moved");
        true
    }

    /// Connect `src`'s output to `dst` written as `unit.input`.
    pub fn connect(&mut self, src: &str, dst: &str, when: When) -> bool {
        let (Some(s), Some((d, input))) = (self.handle(src), self.resolve(dst)) else {
            warn!(src, dst, "unknown connection target");
            return false;
        };
        let accumulate = self
            .node(d)
            .and_then(|n| n.unit.input_defs().get(input))
            .is_some_and(|def| def.accumulate);
        let list = &mut self.edges[s.0];
        match list.iter_mut().find(|e| e.dst == d && e.input == input) {
            Some(edge) => edge.when = when,
            None => list.push(Edge {
                dst: d,
                input,
                accumulate,
                when,
            }),
        }
        debug!(src, dst, %when, "connected");
        true
    }

    pub fn disconnect(&mut self, src: &str, dst: &str) -> bool {
        let (Some(s), Some((d, input))) = (self.handle(src), self.resolve(dst)) else {
            return false;
        };
        let list = &mut self.edges[s.0];
        let before = list.len();
        list.retain(|e| !(e.dst == d && e.input == input));
        before != list.len()
    }

    /// Set the base value of `unit.input`. The `@` nodes are read-only.
    pub fn set_input(&mut self, spec: &str, value: f32) -> bool {
        let Some((h, input)) = self.resolve(spec) else {
            warn!(spec, "unknown unit input");
            return false;
        };
        match self.node_mut(h) {
            Some(node) if !node.internal => {
                node.unit.inputs_mut().set(input, value);
                true
            }
            _ => false,
        }
    }

    pub fn get_input(&self, spec: &str) -> Option<f32> {
        let (h, input) = self.resolve(spec)?;
        Some(self.node(h)?.unit.inputs().base(input))
    }

    /// User units (everything except the `@` nodes), `out` included.
    pub fn unit_count(&self) -> usize {
        self.order.len() - INTERNAL_NODES.len()
    }

    /// Node names in evaluation order.
    pub fn order(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|&h| self.node(h).map(|n| n.name.as_str()))
            .collect()
    }

    pub fn unit_type(&self, name: &str) -> Option<&'static str> {
        self.handle(name).and_then(|h| self.node(h)).map(|n| n.unit.type_name())
    }

    /// Pan position set on `out`, if any.
    pub fn pan(&self) -> Option<f32> {
        let pan = self.node(self.out)?.unit.inputs().base(units::OUT_PAN);
        (!pan.is_nan()).then_some(pan)
    }

    /// Last output of a node.
    pub fn output_of(&self, name: &str) -> Option<f32> {
        self.handle(name).and_then(|h| self.node(h)).map(|n| n.unit.output())
    }

    pub fn connections(&self) -> Vec<Connection> {
        let mut out = Vec::new();
        for &h in &self.order {
            let Some(src) = self.node(h) else { continue };
            for e in &self.edges[h.0] {
                let Some(dst) = self.node(e.dst) else { continue };
                let input = dst.unit.input_defs().get(e.input).map_or("", |d| d.name);
                out.push(Connection {
                    src: src.name.clone(),
                    dst: dst.name.clone(),
                    input: input.to_string(),
                    when: e.when,
                });
            }
        }
        out
    }

    /* ---- parameter addressing ---- */

    pub fn param_id(&self, spec: &str) -> Option<i16> {
        let (h, input) = self.resolve(spec)?;
        let node = self.node(h)?;
        if node.internal || input > 0xff {
            return None;
        }
        Some(i16::from(node.id) << 8 | input as i16)
    }

    pub fn param_name(&self, id: i16) -> Option<String> {
        let (h, input) = self.decode(id)?;
        let node = self.node(h)?;
        let def = node.unit.input_defs().get(input)?;
        Some(format!("{}.{}", node.name, def.name))
    }

    pub fn param_names(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|&h| self.node(h))
            .filter(|n| !n.internal)
            .flat_map(|n| n.unit.input_defs().iter().map(move |d| format!("{}.{}", n.name, d.name)))
            .collect()
    }

    fn decode(&self, id: i16) -> Option<(NodeHandle, usize)> {
        if id < 0x100 {
            return None;
        }
        let unit = u8::try_from(id >> 8).ok()?;
        let h = self.handle_by_id(unit)?;
        if self.node(h)?.internal {
            return None;
        }
        Some((h, (id & 0xff) as usize))
    }

    pub fn get_param(&self, id: i16) -> Option<f32> {
        let (h, input) = self.decode(id)?;
        let inputs = self.node(h)?.unit.inputs();
        (input < inputs.len()).then(|| inputs.base(input))
    }

    pub fn set_param(&mut self, id: i16, value: f32) -> bool {
        let Some((h, input)) = self.decode(id) else {
            return false;
        };
        match self.node_mut(h) {
            Some(node) if input < node.unit.inputs().len() => {
                node.unit.inputs_mut().set(input, value);
                true
            }
            _ => false,
        }
    }

    /* ---- playing ---- */

    /// Deep copy for a new voice. Fresh `@` nodes, user units cloned with
    /// their settings, edges re-resolved by unit ID.
    pub fn instantiate(&self) -> Self {
        let mut copy = Self::new(self.ctx.clone());
        let mut by_id: HashMap<u8, NodeHandle> = HashMap::new();
        for &h in &copy.order {
            if let Some(n) = copy.node(h) {
                by_id.insert(n.id, h);
            }
        }
        for &h in &self.order {
            let Some(node) = self.node(h) else { continue };
            if node.internal {
                continue;
            }
            if node.id == OUT_ID {
                if let Some(out) = copy.node_mut(copy.out) {
                    out.unit = node.unit.clone();
                }
                continue;
            }
            let nh = NodeHandle(copy.nodes.len());
            copy.nodes.push(Some(node.clone()));
            copy.edges.push(Vec::new());
            let tail = copy.order.len() - 1;
            copy.order.insert(tail, nh);
            by_id.insert(node.id, nh);
        }
        for &h in &self.order {
            let Some(src) = self.node(h).and_then(|n| by_id.get(&n.id)).copied() else {
                continue;
            };
            for e in &self.edges[h.0] {
                let dst = self.node(e.dst).and_then(|n| by_id.get(&n.id)).copied();
                if let Some(dst) = dst {
                    copy.edges[src.0].push(Edge { dst, ..*e });
                }
            }
        }
        copy
    }

    pub fn start(&mut self, note: &NoteInfo) {
        self.stopped = false;
        let values = [
            note.sample_rate(),
            note.frequency,
            note.volume,
            note.pitch as f32,
            note.duration,
        ];
        for (k, value) in values.into_iter().enumerate() {
            if let Some(node) = self.order.get(k).copied().and_then(|h| self.node_mut(h)) {
                node.unit.inputs_mut().set(0, value);
            }
        }
        for k in 0..self.order.len() {
            let h = self.order[k];
            let Some(node) = self.nodes[h.0].as_mut() else { continue };
            node.unit.start(note);
            let value = node.unit.output();
            for e in &self.edges[h.0] {
                if !e.when.contains(When::INIT) {
                    continue;
                }
                if let Some(dst) = self.nodes[e.dst.0].as_mut() {
                    dst.unit.inputs_mut().set(e.input, value);
                }
            }
        }
    }

    /// New frequency and volume for a playing note. Reaches units through
    /// the GEN edges of `@frq` and `@vol`.
    pub fn update_note(&mut self, frequency: f32, volume: f32) {
        for (k, value) in [(1, frequency), (2, volume)] {
            if let Some(node) = self.order.get(k).copied().and_then(|h| self.node_mut(h)) {
                node.unit.inputs_mut().set(0, value);
            }
        }
    }

    /// One sample from `out`.
    pub fn tick(&mut self) -> f32 {
        for &h in &self.order {
            let Some(node) = self.nodes[h.0].as_mut() else { continue };
            let value = node.unit.tick();
            node.unit.inputs_mut().clear_sums();
            for e in &self.edges[h.0] {
                if !e.when.contains(When::GEN) {
                    continue;
                }
                if let Some(dst) = self.nodes[e.dst.0].as_mut() {
                    let inputs = dst.unit.inputs_mut();
                    if e.accumulate {
                        inputs.add(e.input, value);
                    } else {
                        inputs.set(e.input, value);
                    }
                }
            }
        }
        self.node(self.out).map_or(0.0, |n| n.unit.output())
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        for node in self.nodes.iter_mut().flatten() {
            node.unit.stop();
        }
    }

    /// Stopped, and every envelope unit has finished its release.
    pub fn is_finished(&self) -> bool {
        self.stopped && self.nodes.iter().flatten().all(|n| n.unit.is_finished())
    }

    /* ---- persistence ---- */

    /// Replace the graph's units and connections with those in `el`.
    ///
    /// `<unit type name id input=value...>` children in evaluation order,
    /// then `<conn src dst when>` children. Saved IDs are kept so parameter
    /// IDs survive the round trip. Unknown unit types and connection targets
    /// are skipped.
    pub fn load(&mut self, el: &Element) {
        *self = Self::new(self.ctx.clone());
        for u in el.children_named("unit") {
            let (Some(type_name), Some(name)) = (u.attr("type"), u.attr("name")) else {
                warn!("unit without type or name skipped");
                continue;
            };
            let id = u.attr("id").and_then(|v| v.parse::<u8>().ok());
            let h = if name == OUT_NODE {
                Some(self.out)
            } else {
                self.add_unit_with_id(type_name, name, id)
            };
            let Some(h) = h else { continue };
            let Some(node) = self.node_mut(h) else { continue };
            for (attr, text) in u.attrs() {
                if attr == "type" || attr == "name" || attr == "id" {
                    continue;
                }
                let (Some(index), Ok(value)) = (node.unit.input_index(attr), text.parse::<f32>()) else {
                    warn!(unit = name, input = attr, "unknown or invalid input skipped");
                    continue;
                };
                node.unit.inputs_mut().set(index, value);
            }
        }
        for c in el.children_named("conn") {
            let (Some(src), Some(dst)) = (c.attr("src"), c.attr("dst")) else {
                continue;
            };
            let when = c.attr("when").and_then(|w| w.parse().ok()).unwrap_or_default();
            self.connect(src, dst, when);
        }
    }

    pub fn save(&self, el: &mut Element) {
        for &h in &self.order {
            let Some(node) = self.node(h) else { continue };
            if node.internal {
                continue;
            }
            let u = el.add_child(Element::new("unit"));
            u.set_attr("type", node.unit.type_name())
                .set_attr("name", &node.name)
                .set_attr("id", node.id);
            for (k, def) in node.unit.input_defs().iter().enumerate() {
                u.set_attr(def.name, node.unit.inputs().base(k));
            }
        }
        for c in self.connections() {
            el.add_child(Element::new("conn"))
                .set_attr("src", &c.src)
                .set_attr("dst", format!("{}.{}", c.dst, c.input))
                .set_attr("when", c.when);
        }
    }
}
