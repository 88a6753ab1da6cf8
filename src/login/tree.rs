//! Runtime login tree: the decrypted view of a stash.
//!
//! The tree is an arena of nodes indexed by position, with parent/child
//! relations stored as indices. Decrypting a login is an explicit walk
//! over those indices: only the nodes on the path to the requested app id
//! (and the subtree below it) ever see plaintext keys. Sibling subtrees
//! stay sealed, so one application's code never holds another's keys.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::EncryptedBox;
use crate::error::{LoginError, LoginResult};
use crate::stash::types::{LoginStash, Voucher};

/// A 256-bit symmetric key, cleared from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        Self(crate::crypto::encryption::random_key())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// One node of the runtime tree. Sealed nodes carry `None` keys.
#[derive(Debug)]
pub struct LoginNode {
    pub login_id: Vec<u8>,
    pub username: Option<String>,
    pub app_id: String,
    /// This node's own symmetric key, when unlocked.
    pub login_key: Option<SecretKey>,
    /// Decrypted sync-repo key, when the box exists and the node is unlocked.
    pub sync_key: Option<SecretKey>,
    /// Decrypted key-login proof secret.
    pub login_auth: Option<Vec<u8>>,
    pub otp_key: Option<String>,
    pub pending_vouchers: Vec<Voucher>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// The decrypted view of a stash tree, keyed at one application node.
#[derive(Debug)]
pub struct LoginTree {
    nodes: Vec<LoginNode>,
    root: usize,
    active: usize,
}

/// Depth-first search over a stash tree; returns the first node matching
/// the predicate, never descending into a match's siblings once found.
pub fn search_tree<'a, F>(stash: &'a LoginStash, predicate: F) -> Option<&'a LoginStash>
where
    F: Fn(&LoginStash) -> bool,
{
    fn walk<'a>(stash: &'a LoginStash, predicate: &dyn Fn(&LoginStash) -> bool) -> Option<&'a LoginStash> {
        if predicate(stash) {
            return Some(stash);
        }
        for child in &stash.children {
            if let Some(found) = walk(child, predicate) {
                return Some(found);
            }
        }
        None
    }
    walk(stash, &predicate)
}

/// Wrap a child login key under its parent's key.
pub fn wrap_key(parent_key: &SecretKey, child_key: &SecretKey) -> LoginResult<EncryptedBox> {
    EncryptedBox::encrypt(child_key.as_bytes(), parent_key.as_bytes())
}

/// Build a login tree from the stash root downward.
///
/// `login_key` is the root node's key; the walk decrypts the `parentBox`
/// chain from the root to the first depth-first node whose `app_id`
/// matches, then unlocks that node's whole subtree. Fails with
/// `AppIdNotFound` when no node matches.
pub fn make_login_tree(
    stash_tree: &LoginStash,
    login_key: SecretKey,
    app_id: &str,
) -> LoginResult<LoginTree> {
    let mut tree = mirror(stash_tree);
    let target = tree
        .find_index(app_id)
        .ok_or_else(|| LoginError::AppIdNotFound {
            app_id: app_id.to_string(),
        })?;

    // Ancestor chain, root first.
    let mut path = vec![target];
    let mut cursor = target;
    while let Some(parent) = tree.nodes[cursor].parent {
        path.push(parent);
        cursor = parent;
    }
    path.reverse();

    // Decrypt the chain: the root takes the supplied key, each child's key
    // comes out of its parentBox.
    let mut key = login_key;
    for (step, &idx) in path.iter().enumerate() {
        if step > 0 {
            let stash_node = stash_node_at(stash_tree, &tree, idx);
            let parent_box = stash_node
                .parent_box
                .as_ref()
                .ok_or(LoginError::Decrypt)?;
            key = SecretKey::new(parent_box.decrypt_key(key.as_bytes())?);
        }
        tree.unlock(stash_tree, idx, key.clone())?;
    }

    // The target's own subtree belongs to the requested app: unlock it.
    tree.unlock_descendants(stash_tree, target)?;
    tree.active = target;
    Ok(tree)
}

/// Build a login tree with the key attached directly at the `app_id` node,
/// leaving every ancestor sealed. This is how factors that live on a
/// sub-login (PIN, edge-login replies) open the tree.
pub fn make_login_tree_keyed(
    stash_tree: &LoginStash,
    login_key: SecretKey,
    app_id: &str,
) -> LoginResult<LoginTree> {
    let mut tree = mirror(stash_tree);
    let target = tree
        .find_index(app_id)
        .ok_or_else(|| LoginError::AppIdNotFound {
            app_id: app_id.to_string(),
        })?;

    tree.unlock(stash_tree, target, login_key)?;
    tree.unlock_descendants(stash_tree, target)?;
    tree.active = target;
    Ok(tree)
}

impl LoginTree {
    pub fn root(&self) -> &LoginNode {
        &self.nodes[self.root]
    }

    /// The node the active factor unlocked.
    pub fn active(&self) -> &LoginNode {
        &self.nodes[self.active]
    }

    /// The active node's login key. Always present: a tree is only ever
    /// built by successfully unlocking its active node.
    pub fn login_key(&self) -> &SecretKey {
        self.nodes[self.active]
            .login_key
            .as_ref()
            .expect("active node is always unlocked")
    }

    /// First depth-first node matching the app id, unlocked or not.
    pub fn find_app(&self, app_id: &str) -> Option<&LoginNode> {
        self.find_index(app_id).map(|idx| &self.nodes[idx])
    }

    pub fn node(&self, idx: usize) -> &LoginNode {
        &self.nodes[idx]
    }

    /// Copy device-local secrets out of their synced key boxes into the
    /// stash: `pin2KeyBox` → `pin2Key`, `recovery2KeyBox` →
    /// `recovery2Key`. This is what lets a device that logged in with a
    /// password offer PIN login afterwards. Boxes that fail to open are
    /// skipped; the login itself already succeeded.
    pub fn adopt_local_secrets(&self, stash: &mut LoginStash) {
        for node in &self.nodes {
            let Some(key) = &node.login_key else { continue };
            let Some(stash_node) = find_mut(stash, &node.login_id) else {
                continue;
            };
            if stash_node.pin2_key.is_none() {
                if let Some(sealed) = &stash_node.pin2_key_box {
                    stash_node.pin2_key = sealed.decrypt(key.as_bytes()).ok();
                }
            }
            if stash_node.recovery2_key.is_none() {
                if let Some(sealed) = &stash_node.recovery2_key_box {
                    stash_node.recovery2_key = sealed.decrypt(key.as_bytes()).ok();
                }
            }
        }
    }

    /// Re-seal the decrypted `parentBox` chain into a new stash with fresh
    /// IVs, leaving every other field untouched. The wrapped keys are
    /// bit-identical, so rebuilding a tree from the result yields the same
    /// login keys.
    pub fn re_encrypt(&self, base: &LoginStash) -> LoginResult<LoginStash> {
        let mut out = base.clone();
        for node in &self.nodes {
            let (Some(parent), Some(child_key)) = (node.parent, node.login_key.as_ref()) else {
                continue;
            };
            let Some(parent_key) = self.nodes[parent].login_key.as_ref() else {
                continue;
            };
            let sealed = wrap_key(parent_key, child_key)?;
            if let Some(stash_node) = find_mut(&mut out, &node.login_id) {
                stash_node.parent_box = Some(sealed);
            }
        }
        Ok(out)
    }

    fn find_index(&self, app_id: &str) -> Option<usize> {
        fn walk(tree: &LoginTree, idx: usize, app_id: &str) -> Option<usize> {
            if tree.nodes[idx].app_id == app_id {
                return Some(idx);
            }
            for &child in &tree.nodes[idx].children {
                if let Some(found) = walk(tree, child, app_id) {
                    return Some(found);
                }
            }
            None
        }
        walk(self, self.root, app_id)
    }

    /// Decrypt one node's own boxes with its key.
    fn unlock(&mut self, stash_tree: &LoginStash, idx: usize, key: SecretKey) -> LoginResult<()> {
        let stash_node = stash_node_at(stash_tree, self, idx);

        let sync_key = match &stash_node.sync_key_box {
            Some(sealed) => Some(SecretKey::new(sealed.decrypt_key(key.as_bytes())?)),
            None => None,
        };
        let login_auth = match &stash_node.login_auth_box {
            Some(sealed) => Some(sealed.decrypt(key.as_bytes())?),
            None => None,
        };

        let node = &mut self.nodes[idx];
        node.login_key = Some(key);
        node.sync_key = sync_key;
        node.login_auth = login_auth;
        Ok(())
    }

    /// Unlock everything below an already-unlocked node via parentBox.
    fn unlock_descendants(&mut self, stash_tree: &LoginStash, idx: usize) -> LoginResult<()> {
        let children = self.nodes[idx].children.clone();
        for child in children {
            let parent_key = self.nodes[idx]
                .login_key
                .clone()
                .ok_or(LoginError::Decrypt)?;
            let stash_node = stash_node_at(stash_tree, self, child);
            let parent_box = stash_node.parent_box.as_ref().ok_or(LoginError::Decrypt)?;
            let child_key = SecretKey::new(parent_box.decrypt_key(parent_key.as_bytes())?);
            self.unlock(stash_tree, child, child_key)?;
            self.unlock_descendants(stash_tree, child)?;
        }
        Ok(())
    }
}

/// Mirror a stash tree into a sealed arena.
fn mirror(stash_tree: &LoginStash) -> LoginTree {
    fn add(tree: &mut LoginTree, stash: &LoginStash, parent: Option<usize>) -> usize {
        let idx = tree.nodes.len();
        tree.nodes.push(LoginNode {
            login_id: stash.login_id.clone(),
            username: stash.username.clone(),
            app_id: stash.app_id.clone(),
            login_key: None,
            sync_key: None,
            login_auth: None,
            otp_key: stash.otp_key.clone(),
            pending_vouchers: stash.pending_vouchers.clone(),
            parent,
            children: Vec::new(),
        });
        for child in &stash.children {
            let child_idx = add(tree, child, Some(idx));
            tree.nodes[idx].children.push(child_idx);
        }
        idx
    }

    let mut tree = LoginTree {
        nodes: Vec::new(),
        root: 0,
        active: 0,
    };
    add(&mut tree, stash_tree, None);
    tree
}

/// Locate the stash node backing an arena index (by login id).
fn stash_node_at<'a>(stash_tree: &'a LoginStash, tree: &LoginTree, idx: usize) -> &'a LoginStash {
    search_tree(stash_tree, |node| node.login_id == tree.nodes[idx].login_id)
        .expect("arena mirrors the stash tree")
}

/// Mutable lookup by login id.
pub(crate) fn find_mut<'a>(stash: &'a mut LoginStash, login_id: &[u8]) -> Option<&'a mut LoginStash> {
    if stash.login_id == login_id {
        return Some(stash);
    }
    for child in &mut stash.children {
        if let Some(found) = find_mut(child, login_id) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root("") -> child("app.a") -> grandchild("app.a.x"), plus a sealed
    /// sibling child("app.b"). Returns the stash and the three keys.
    fn sample_tree() -> (LoginStash, SecretKey, SecretKey, SecretKey) {
        let root_key = SecretKey::generate();
        let a_key = SecretKey::generate();
        let x_key = SecretKey::generate();
        let b_key = SecretKey::generate();

        let mut root = LoginStash::new(vec![1u8; 32], "");
        root.username = Some("alice".into());
        root.sync_key_box = Some(
            EncryptedBox::encrypt(SecretKey::generate().as_bytes(), root_key.as_bytes()).unwrap(),
        );

        let mut a = LoginStash::new(vec![2u8; 32], "app.a");
        a.parent_box = Some(wrap_key(&root_key, &a_key).unwrap());

        let mut x = LoginStash::new(vec![3u8; 32], "app.a.x");
        x.parent_box = Some(wrap_key(&a_key, &x_key).unwrap());
        a.children.push(x);

        let mut b = LoginStash::new(vec![4u8; 32], "app.b");
        b.parent_box = Some(wrap_key(&root_key, &b_key).unwrap());

        root.children.push(a);
        root.children.push(b);
        (root, root_key, a_key, x_key)
    }

    #[test]
    fn root_walk_reaches_nested_app() {
        let (stash, root_key, a_key, x_key) = sample_tree();

        let tree = make_login_tree(&stash, root_key, "app.a").unwrap();
        assert_eq!(tree.active().app_id, "app.a");
        assert_eq!(tree.login_key(), &a_key);

        // The target's own subtree is unlocked too.
        let x = tree.find_app("app.a.x").unwrap();
        assert_eq!(x.login_key.as_ref().unwrap(), &x_key);
    }

    #[test]
    fn siblings_off_the_path_stay_sealed() {
        let (stash, root_key, _, _) = sample_tree();

        let tree = make_login_tree(&stash, root_key, "app.a").unwrap();
        let b = tree.find_app("app.b").unwrap();
        assert!(b.login_key.is_none());
        assert!(b.sync_key.is_none());
    }

    #[test]
    fn keyed_attach_leaves_ancestors_sealed() {
        let (stash, _, a_key, x_key) = sample_tree();

        let tree = make_login_tree_keyed(&stash, a_key.clone(), "app.a").unwrap();
        assert_eq!(tree.login_key(), &a_key);
        assert!(tree.root().login_key.is_none());

        // Descendants of the keyed node unlock.
        let x = tree.find_app("app.a.x").unwrap();
        assert_eq!(x.login_key.as_ref().unwrap(), &x_key);
    }

    #[test]
    fn unknown_app_id_fails() {
        let (stash, root_key, _, _) = sample_tree();
        let err = make_login_tree(&stash, root_key, "no.such.app").unwrap_err();
        assert!(matches!(err, LoginError::AppIdNotFound { .. }));
    }

    #[test]
    fn wrong_root_key_fails_closed() {
        let (stash, _, _, _) = sample_tree();
        let err = make_login_tree(&stash, SecretKey::generate(), "app.a").unwrap_err();
        assert!(matches!(err, LoginError::Decrypt));
    }

    #[test]
    fn re_encrypt_roundtrips_login_keys() {
        let (stash, root_key, _, x_key) = sample_tree();

        let tree = make_login_tree(&stash, root_key.clone(), "app.a.x").unwrap();
        assert_eq!(tree.login_key(), &x_key);

        let resealed = tree.re_encrypt(&stash).unwrap();
        // The boxes changed (fresh IVs)...
        assert_ne!(resealed.children[0].parent_box, stash.children[0].parent_box);

        // ...but the wrapped keys are bit-identical.
        let again = make_login_tree(&resealed, root_key, "app.a.x").unwrap();
        assert_eq!(again.login_key(), &x_key);
    }

    #[test]
    fn search_tree_finds_first_depth_first_match() {
        let (stash, _, _, _) = sample_tree();
        let found = search_tree(&stash, |node| node.app_id.starts_with("app.")).unwrap();
        assert_eq!(found.app_id, "app.a");
        assert!(search_tree(&stash, |node| node.app_id == "zzz").is_none());
    }

    #[test]
    fn secret_key_debug_is_redacted() {
        let key = SecretKey::generate();
        assert_eq!(format!("{key:?}"), "SecretKey([REDACTED])");
    }
}
