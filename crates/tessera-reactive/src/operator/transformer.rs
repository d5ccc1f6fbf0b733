use ahash::AHashSet;
use std::fmt;
use std::hash::Hash;

pub type MapFn<P> = Box<dyn FnMut(P) -> anyhow::Result<P> + Send>;
pub type FlatMapFn<P> = Box<dyn FnMut(P) -> anyhow::Result<Vec<P>> + Send>;

/// One-in, zero-or-more-out stage
pub enum Transformer<P> {
    Map(MapFn<P>),
    FlatMap(FlatMapFn<P>),
    /// Forwards each item the first time it is seen
    Distinct(AHashSet<P>),
}

impl<P: Clone + Eq + Hash> Transformer<P> {
    pub fn map(f: impl FnMut(P) -> anyhow::Result<P> + Send + 'static) -> Self {
        Transformer::Map(Box::new(f))
    }

    pub fn flat_map(f: impl FnMut(P) -> anyhow::Result<Vec<P>> + Send + 'static) -> Self {
        Transformer::FlatMap(Box::new(f))
    }

    pub fn distinct() -> Self {
        Transformer::Distinct(AHashSet::new())
    }

    /// Apply the stage to one input item.
    pub fn accept(&mut self, packet: P) -> anyhow::Result<Vec<P>> {
        match self {
            Transformer::Map(f) => f(packet).map(|out| vec![out]),
            Transformer::FlatMap(f) => f(packet),
            Transformer::Distinct(seen) => {
                if seen.insert(packet.clone()) {
                    Ok(vec![packet])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transformer::Map(_) => "map",
            Transformer::FlatMap(_) => "flat-map",
            Transformer::Distinct(_) => "distinct",
        }
    }
}

impl<P> fmt::Debug for Transformer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformer::Map(_) => f.write_str("Map"),
            Transformer::FlatMap(_) => f.write_str("FlatMap"),
            Transformer::Distinct(seen) => write!(f, "Distinct({} seen)", seen.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_emits_one_output() {
        let mut double = Transformer::map(|x: u32| Ok(x * 2));
        assert_eq!(double.accept(21).unwrap(), vec![42]);
    }

    #[test]
    fn flat_map_may_emit_nothing() {
        let mut expand = Transformer::flat_map(|x: u32| Ok((0..x).collect()));
        assert_eq!(expand.accept(3).unwrap(), vec![0, 1, 2]);
        assert!(expand.accept(0).unwrap().is_empty());
    }

    #[test]
    fn distinct_forwards_first_occurrence_only() {
        let mut distinct = Transformer::distinct();
        let outputs: Vec<Vec<char>> = "abacb".chars().map(|c| distinct.accept(c).unwrap()).collect();
        assert_eq!(outputs, vec![vec!['a'], vec!['b'], vec![], vec!['c'], vec![]]);
    }

    #[test]
    fn callback_errors_surface() {
        let mut failing = Transformer::map(|x: i64| {
            if x < 0 {
                anyhow::bail!("negative input {x}");
            }
            Ok(x)
        });
        assert!(failing.accept(1).is_ok());
        assert!(failing.accept(-1).unwrap_err().to_string().contains("negative input -1"));
    }
}
