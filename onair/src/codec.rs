//! Page and block encoding
//!
//! There are two serialized forms of a [Node]:
//!
//! - a *page* lives in the novelty arena. It is the packed cbor encoding of the node and is
//!   never compressed, so that the size of a page only depends on the shape of the node, the
//!   lengths of its keys and values and its child references. Overwriting a value with one of the
//!   same length therefore produces a page of the same length, which can be updated in place.
//! - a *block* lives in storage. It is a zstd compressed cbor 2-tuple of the tree order (only set
//!   for the root block of a commit) and the node. All child references in a block are storage
//!   references.
use crate::{error::Error, node::Node, store::Link};
use std::convert::TryFrom;

/// encode a node as a novelty page
pub(crate) fn encode_page<L: Link>(node: &Node<L>) -> Result<Vec<u8>, Error> {
    Ok(serde_cbor::ser::to_vec_packed(node)?)
}

/// decode a novelty page
pub(crate) fn decode_page<L: Link>(data: &[u8]) -> Result<Node<L>, Error> {
    let node: Node<L> = serde_cbor::from_slice(data)?;
    node.validate()?;
    Ok(node)
}

/// encode a node as a storage block
///
/// `order` must only be given for the root of a commit.
pub(crate) fn encode_block<L: Link>(
    node: &Node<L>,
    order: Option<usize>,
    zstd_level: i32,
) -> Result<Vec<u8>, Error> {
    if let Node::Branch(branch) = node {
        if branch.children.iter().any(|child| child.is_novelty()) {
            return Err(Error::Invalid("stored branch must not reference novelty"));
        }
    }
    let order = order
        .map(u32::try_from)
        .transpose()
        .map_err(|_| Error::Invalid("order does not fit in u32"))?;
    let cbor = serde_cbor::ser::to_vec_packed(&(order, node))?;
    Ok(zstd::encode_all(cbor.as_slice(), zstd_level)?)
}

/// decode a storage block, returning the persisted order if this is a root block
pub(crate) fn decode_block<L: Link>(data: &[u8]) -> Result<(Option<usize>, Node<L>), Error> {
    let cbor = zstd::decode_all(data)?;
    let (order, node): (Option<u32>, Node<L>) = serde_cbor::from_slice(&cbor)?;
    node.validate()?;
    if let Node::Branch(branch) = &node {
        if branch.children.iter().any(|child| child.is_novelty()) {
            return Err(Error::Invalid("stored branch must not reference novelty"));
        }
    }
    Ok((order.map(|order| order as usize), node))
}
