//! Graphviz output.
//!
//! Terminal nodes are squares, boolean nodes circles, clock-difference
//! nodes octagons. Edges to the false terminal from a clock node are
//! omitted (there may be many). Negated boolean nodes are printed red; a
//! boolean subgraph is emitted once per negation parity it is reached with,
//! the parity being part of the node id. With `push_negate` the arrows into
//! terminals are flipped according to the accumulated parity, so the
//! displayed terminal is the semantic one; without it the diagram is
//! printed as stored and a path's value is read by counting red nodes.

use std::io::{self, Write};

use hashbrown::HashSet;

use crate::bounds::{bnd_is_strict, bnd_l2u, bnd_limit, Raw, INF};
use crate::cdd::Cdd;
use crate::node::LevelKind;
use crate::reference::Ref;

fn node_id(r: Ref, parity: bool) -> String {
    format!("n{}_{}", r.raw(), parity as u8)
}

fn terminal_id(negated: bool) -> String {
    format!("terminal_{}", negated as u8)
}

fn write_interval<W: Write>(w: &mut W, lower: Raw, upper: Raw) -> io::Result<()> {
    if lower == -INF {
        write!(w, "]-INF;")?;
    } else {
        let l = bnd_l2u(lower);
        write!(w, "{}{};", if bnd_is_strict(l) { "]" } else { "[" }, -bnd_limit(l))?;
    }
    if upper == INF {
        write!(w, "INF[")
    } else {
        write!(w, "{}{}", bnd_limit(upper), if bnd_is_strict(upper) { "[" } else { "]" })
    }
}

impl Cdd {
    /// Writes the diagram rooted at `node` as a Graphviz digraph.
    pub fn fprintdot<W: Write>(&self, w: &mut W, node: Ref, push_negate: bool) -> io::Result<()> {
        writeln!(w, "digraph G {{")?;
        if self.is_terminal(node) {
            writeln!(
                w,
                "\"{}\" [shape=box, label=\"{}\", style=filled, height=0.3, width=0.3];",
                terminal_id(node.is_negated()),
                node.is_negated() as u8
            )?;
        } else {
            for negated in [true, false] {
                writeln!(
                    w,
                    "\"{}\" [shape=box, label=\"{}\", style=filled, height=0.3, width=0.3];",
                    terminal_id(negated),
                    negated as u8
                )?;
            }
            let mut bdd_seen = HashSet::new();
            let mut cdd_seen = HashSet::new();
            self.fprintdot_rec(w, node, push_negate, false, &mut bdd_seen, &mut cdd_seen)?;
        }
        writeln!(w, "}}")
    }

    /// [`Cdd::fprintdot`] to stdout.
    pub fn printdot(&self, node: Ref, push_negate: bool) {
        let stdout = io::stdout();
        let _ = self.fprintdot(&mut stdout.lock(), node, push_negate);
    }

    /// The dot digraph as a string.
    pub fn to_dot(&self, node: Ref, push_negate: bool) -> String {
        let mut buf = Vec::new();
        self.fprintdot(&mut buf, node, push_negate).expect("writing to a Vec cannot fail");
        String::from_utf8(buf).expect("dot output is ASCII")
    }

    fn fprintdot_rec<W: Write>(
        &self,
        w: &mut W,
        r: Ref,
        push_negate: bool,
        parity: bool,
        bdd_seen: &mut HashSet<(u32, bool)>,
        cdd_seen: &mut HashSet<u32>,
    ) -> io::Result<()> {
        if self.is_terminal(r) {
            return Ok(());
        }

        let level = self.level_of(r);
        match self.levels[level as usize].kind {
            LevelKind::Bdd => {
                if !bdd_seen.insert((r.raw(), parity)) {
                    return Ok(());
                }
                let color = if r.is_negated() { "red" } else { "black" };
                writeln!(
                    w,
                    "\"{}\" [shape=circle, color={}, label=\"b{}\"];",
                    node_id(r, parity),
                    color,
                    level
                )?;

                let child_parity = parity ^ r.is_negated();
                let (low, high) = self.bdd_children(r.regular());
                for (child, style) in [(high, "filled"), (low, "dashed")] {
                    let target = if self.is_tf_terminal(child) {
                        // Flip the terminal by the accumulated parity when
                        // the printout should resolve negations.
                        let neg = child.is_negated() ^ (push_negate && child_parity);
                        terminal_id(neg)
                    } else {
                        node_id(child, child_parity)
                    };
                    writeln!(
                        w,
                        "\"{}\" -> \"{}\" [style={}];",
                        node_id(r, parity),
                        target,
                        style
                    )?;
                    self.fprintdot_rec(w, child, push_negate, child_parity, bdd_seen, cdd_seen)?;
                }
            }
            LevelKind::Cdd { clock1, clock2, .. } => {
                if !cdd_seen.insert(r.index()) {
                    return Ok(());
                }
                writeln!(
                    w,
                    "\"{}\" [shape=octagon, label=\"x{}-x{}\"];",
                    node_id(r.regular(), false),
                    clock1,
                    clock2
                )?;

                let mut lower = -INF;
                for elem in self.cdd_elems(r.regular()) {
                    let child = elem.child;
                    if child != Self::FALSE {
                        let target = if self.is_tf_terminal(child) {
                            terminal_id(child.is_negated())
                        } else {
                            node_id(child.regular(), false)
                        };
                        let style = if child.is_negated() { "dashed" } else { "filled" };
                        write!(
                            w,
                            "\"{}\" -> \"{}\" [style={}, label=\"",
                            node_id(r.regular(), false),
                            target,
                            style
                        )?;
                        write_interval(w, lower, elem.bnd)?;
                        writeln!(w, "\"];")?;
                        self.fprintdot_rec(w, child, push_negate, false, bdd_seen, cdd_seen)?;
                    }
                    lower = elem.bnd;
                }
            }
        }
        Ok(())
    }
}
