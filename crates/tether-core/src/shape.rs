//! Typed decoders for envelope trees
//!
//! Every tree read off the relay or a continuation is turned into a fully
//! typed value here, once, or rejected with `ShapeError` naming the first
//! bad field. Nothing downstream re-checks field presence.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use tether_crypto::{CipherItem, SecretEnvelope};
use tether_relay::apps::{AppCredentials, Installed};

use crate::codec::{Node, Tree};
use crate::error::{HandshakeError, Result};
use crate::pake::{
    ClientAuthData, ClientAuthResult, ClientState, ServerAuthData, ServerCredentials, ServerFinal,
};
use crate::records::{InstallationRecord, Pasted, SessionState, TokenInputs};

/// Build a value from a tree, or name the field that is wrong.
pub trait FromTree: Sized {
    fn from_tree(tree: &Tree) -> Result<Self>;
}

/// Render a value as a tree.
pub trait ToTree {
    fn to_tree(&self) -> Tree;
}

fn field<'a>(tree: &'a Tree, key: &str) -> Result<&'a Node> {
    tree.get(key)
        .ok_or_else(|| HandshakeError::Shape(format!("{key} is missing")))
}

pub fn bytes(tree: &Tree, key: &str) -> Result<Vec<u8>> {
    match field(tree, key)? {
        Node::Bytes(b) => Ok(b.clone()),
        _ => Err(HandshakeError::Shape(format!("{key} must be bytes"))),
    }
}

pub fn text(tree: &Tree, key: &str) -> Result<String> {
    match field(tree, key)? {
        Node::Text(s) => Ok(s.clone()),
        _ => Err(HandshakeError::Shape(format!("{key} must be text"))),
    }
}

pub fn number(tree: &Tree, key: &str) -> Result<i64> {
    match field(tree, key)? {
        Node::Number(n) => Ok(*n),
        _ => Err(HandshakeError::Shape(format!("{key} must be a number"))),
    }
}

pub fn subtree<'a>(tree: &'a Tree, key: &str) -> Result<&'a Tree> {
    match field(tree, key)? {
        Node::Tree(t) => Ok(t),
        _ => Err(HandshakeError::Shape(format!("{key} must be a tree"))),
    }
}

/// Decode the subtree under `key` as `T`, prefixing errors with the key.
pub fn decode_field<T: FromTree>(tree: &Tree, key: &str) -> Result<T> {
    T::from_tree(subtree(tree, key)?).map_err(|err| match err {
        HandshakeError::Shape(detail) => HandshakeError::Shape(format!("{key}.{detail}")),
        other => other,
    })
}

fn with<const N: usize>(pairs: [(&str, Node); N]) -> Tree {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl FromTree for CipherItem {
    fn from_tree(tree: &Tree) -> Result<Self> {
        let item = CipherItem {
            iv: bytes(tree, "iv")?,
            tag: bytes(tree, "tag")?,
            ciphertext: bytes(tree, "ciphertext")?,
        };
        item.check_shape()?;
        Ok(item)
    }
}

impl ToTree for CipherItem {
    fn to_tree(&self) -> Tree {
        with([
            ("iv", self.iv.clone().into()),
            ("tag", self.tag.clone().into()),
            ("ciphertext", self.ciphertext.clone().into()),
        ])
    }
}

impl FromTree for SecretEnvelope {
    fn from_tree(tree: &Tree) -> Result<Self> {
        let envelope = SecretEnvelope {
            salt: bytes(tree, "salt")?,
            key: decode_field(tree, "key")?,
            data: decode_field(tree, "data")?,
        };
        envelope.check_shape()?;
        Ok(envelope)
    }
}

impl ToTree for SecretEnvelope {
    fn to_tree(&self) -> Tree {
        with([
            ("salt", self.salt.clone().into()),
            ("key", self.key.to_tree().into()),
            ("data", self.data.to_tree().into()),
        ])
    }
}

impl FromTree for ClientAuthData {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(ClientAuthData {
            sid: text(tree, "sid")?,
            pw: bytes(tree, "pw")?,
            user_ephemeral: bytes(tree, "Xu")?,
            alpha: bytes(tree, "alpha")?,
        })
    }
}

impl ToTree for ClientAuthData {
    fn to_tree(&self) -> Tree {
        with([
            ("sid", self.sid.clone().into()),
            ("pw", self.pw.clone().into()),
            ("Xu", self.user_ephemeral.clone().into()),
            ("alpha", self.alpha.clone().into()),
        ])
    }
}

// The credential items come from the PAKE library, which checks its own
// widths; only presence and byte-ness are enforced here.
fn loose_item(tree: &Tree, key: &str) -> Result<CipherItem> {
    let sub = subtree(tree, key)?;
    let prefixed = |e: HandshakeError| match e {
        HandshakeError::Shape(d) => HandshakeError::Shape(format!("{key}.{d}")),
        other => other,
    };
    Ok(CipherItem {
        iv: bytes(sub, "iv").map_err(prefixed)?,
        tag: bytes(sub, "tag").map_err(prefixed)?,
        ciphertext: bytes(sub, "ciphertext").map_err(prefixed)?,
    })
}

impl FromTree for ServerCredentials {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(ServerCredentials {
            user_private: loose_item(tree, "pu")?,
            user_public: loose_item(tree, "Pu")?,
            server_public: loose_item(tree, "Ps")?,
        })
    }
}

impl ToTree for ServerCredentials {
    fn to_tree(&self) -> Tree {
        with([
            ("pu", self.user_private.to_tree().into()),
            ("Pu", self.user_public.to_tree().into()),
            ("Ps", self.server_public.to_tree().into()),
        ])
    }
}

impl FromTree for ServerAuthData {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(ServerAuthData {
            server_proof: bytes(tree, "As")?,
            server_ephemeral: bytes(tree, "Xs")?,
            beta: bytes(tree, "beta")?,
            credentials: decode_field(tree, "c")?,
        })
    }
}

impl ToTree for ServerAuthData {
    fn to_tree(&self) -> Tree {
        with([
            ("As", self.server_proof.clone().into()),
            ("Xs", self.server_ephemeral.clone().into()),
            ("beta", self.beta.clone().into()),
            ("c", self.credentials.to_tree().into()),
        ])
    }
}

impl FromTree for ClientAuthResult {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(ClientAuthResult {
            client_proof: bytes(tree, "Au")?,
        })
    }
}

impl ToTree for ClientAuthResult {
    fn to_tree(&self) -> Tree {
        with([("Au", self.client_proof.clone().into())])
    }
}

impl FromTree for ServerFinal {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(ServerFinal {
            client_proof: bytes(tree, "Au")?,
            token: SecretString::new(text(tree, "token")?),
        })
    }
}

impl ToTree for ServerFinal {
    fn to_tree(&self) -> Tree {
        with([
            ("Au", self.client_proof.clone().into()),
            ("token", self.token.expose_secret().clone().into()),
        ])
    }
}

impl FromTree for SessionState {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(SessionState {
            sid: text(tree, "sid")?,
            last: ServerFinal::from_tree(tree)?,
        })
    }
}

impl ToTree for SessionState {
    fn to_tree(&self) -> Tree {
        let mut tree = self.last.to_tree();
        tree.insert("sid".to_string(), self.sid.clone().into());
        tree
    }
}

impl FromTree for ClientState {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(ClientState {
            r: bytes(tree, "r")?,
            xu: bytes(tree, "xu")?,
            mask: bytes(tree, "mask")?,
        })
    }
}

impl ToTree for ClientState {
    fn to_tree(&self) -> Tree {
        with([
            ("r", self.r.clone().into()),
            ("xu", self.xu.clone().into()),
            ("mask", self.mask.clone().into()),
        ])
    }
}

impl FromTree for AppCredentials {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(AppCredentials {
            id: text(tree, "id")?,
            client_id: text(tree, "client_id")?,
            client_secret: SecretString::new(text(tree, "client_secret")?),
            pem: SecretString::new(text(tree, "pem")?),
        })
    }
}

impl ToTree for AppCredentials {
    fn to_tree(&self) -> Tree {
        with([
            ("id", self.id.clone().into()),
            ("client_id", self.client_id.clone().into()),
            ("client_secret", self.client_secret.expose_secret().clone().into()),
            ("pem", self.pem.expose_secret().clone().into()),
        ])
    }
}

impl FromTree for Installed {
    fn from_tree(tree: &Tree) -> Result<Self> {
        let mut permissions = BTreeMap::new();
        for (name, level) in subtree(tree, "permissions")? {
            match level {
                Node::Text(level) => {
                    permissions.insert(name.clone(), level.clone());
                }
                _ => {
                    return Err(HandshakeError::Shape(format!(
                        "permissions.{name} must be text"
                    )))
                }
            }
        }
        Ok(Installed {
            id: number(tree, "id")?,
            token: SecretString::new(text(tree, "token")?),
            permissions,
        })
    }
}

impl ToTree for Installed {
    fn to_tree(&self) -> Tree {
        let permissions: Tree = self
            .permissions
            .iter()
            .map(|(k, v)| (k.clone(), Node::Text(v.clone())))
            .collect();
        with([
            ("id", self.id.into()),
            ("token", self.token.expose_secret().clone().into()),
            ("permissions", permissions.into()),
        ])
    }
}

impl FromTree for TokenInputs {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(TokenInputs {
            shared: SecretString::new(text(tree, "shared")?),
            app: decode_field(tree, "app")?,
        })
    }
}

impl ToTree for TokenInputs {
    fn to_tree(&self) -> Tree {
        with([
            ("shared", self.shared.expose_secret().clone().into()),
            ("app", self.app.to_tree().into()),
        ])
    }
}

impl FromTree for Pasted {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(Pasted {
            code: decode_field(tree, "C")?,
            server: decode_field(tree, "S")?,
        })
    }
}

impl ToTree for Pasted {
    fn to_tree(&self) -> Tree {
        with([
            ("C", self.code.to_tree().into()),
            ("S", self.server.to_tree().into()),
        ])
    }
}

impl FromTree for InstallationRecord {
    fn from_tree(tree: &Tree) -> Result<Self> {
        Ok(InstallationRecord {
            installed: decode_field(tree, "installed")?,
            shared: SecretString::new(text(tree, "shared")?),
            app: decode_field(tree, "app")?,
        })
    }
}

impl ToTree for InstallationRecord {
    fn to_tree(&self) -> Tree {
        with([
            ("installed", self.installed.to_tree().into()),
            ("shared", self.shared.expose_secret().clone().into()),
            ("app", self.app.to_tree().into()),
        ])
    }
}
