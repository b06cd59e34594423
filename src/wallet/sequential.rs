//! Sequential (BIP-44) sub-wallet
//!
//! One instance per chain: the external chain hands out receive
//! addresses, the internal chain change addresses. The sub-wallet owns
//! its address book and the per `(zone, account)` cursor; derivation is
//! the zone-filtered forward search of [`bip44::search_zone_address`].

use std::collections::BTreeMap;
use std::result;

use crate::address::{is_qi_address, zone_of, Zone};
use crate::bip::bip44::{self, search_zone_address, AddrType, DerivedLeaf};
use crate::config::CoinType;
use crate::hdwallet::XPrv;

use super::{
    AddressBook, AddressScanner, AddressStatus, DerivationPath, Error, QiAddressInfo, Result,
    SyncError,
};

pub struct Bip44Wallet {
    addr_type: AddrType,
    coin_type: CoinType,
    // change-level nodes (m/44'/coinType'/account/change), cached per account
    change_nodes: BTreeMap<u32, XPrv>,
    book: AddressBook,
}

impl Bip44Wallet {
    pub fn new(addr_type: AddrType, coin_type: CoinType, gap_limit: u32) -> Self {
        Bip44Wallet {
            addr_type,
            coin_type,
            change_nodes: BTreeMap::new(),
            book: AddressBook::new(gap_limit),
        }
    }

    pub fn addr_type(&self) -> AddrType {
        self.addr_type
    }

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    pub(crate) fn book_mut(&mut self) -> &mut AddressBook {
        &mut self.book
    }

    pub fn derivation_path(&self) -> DerivationPath {
        match self.addr_type {
            AddrType::External => DerivationPath::Bip44External,
            AddrType::Internal => DerivationPath::Bip44Change,
        }
    }

    fn change_node(&mut self, root: &XPrv, account: u32) -> Result<XPrv> {
        if let Some(node) = self.change_nodes.get(&account) {
            return Ok(node.clone());
        }
        let account = bip44::Account::new(account)?;
        let node = root
            .derive(account.soft_index())
            .and_then(|n| n.derive(self.addr_type.index()))
            .map_err(bip44::Error::from)?;
        self.change_nodes.insert(account.number(), node.clone());
        Ok(node)
    }

    fn record(&self, leaf: &DerivedLeaf, account: u32, zone: Zone) -> QiAddressInfo {
        QiAddressInfo {
            address: leaf.address,
            pub_key: *leaf.xpub.public_key(),
            index: leaf.index,
            account,
            zone,
            change: self.addr_type.is_change(),
            status: AddressStatus::Unknown,
            derivation_path: self.derivation_path(),
            last_synced_block: None,
        }
    }

    /// derive, record and return the next address for `(account, zone)`
    ///
    /// The cursor only advances when a record is committed; a failing
    /// search leaves the sub-wallet untouched.
    pub fn next_address(&mut self, root: &XPrv, account: u32, zone: Zone) -> Result<QiAddressInfo> {
        let node = self.change_node(root, account)?;
        let start = self.book.next_index(zone, account);
        let leaf = search_zone_address(&node, start, zone, self.coin_type)?;
        let info = self.record(&leaf, account, zone);
        self.book.insert(info.clone())?;
        Ok(info)
    }

    /// derive directly at the given child index and record the result
    pub fn add_address(&mut self, root: &XPrv, account: u32, index: u32) -> Result<QiAddressInfo> {
        if self.book.contains_index(account, index) {
            return Err(Error::IndexInUse {
                account,
                change: self.addr_type.is_change(),
                index,
            });
        }
        let node = self.change_node(root, account)?;
        let leaf = node.derive(index).map_err(bip44::Error::from)?;
        let xpub = leaf.public();
        let address = xpub.address();
        if is_qi_address(&address) != (self.coin_type == CoinType::Qi) {
            return Err(Error::InvalidAddressZone(address));
        }
        let zone = zone_of(&address).ok_or(Error::InvalidAddressZone(address))?;
        let info = QiAddressInfo {
            address,
            pub_key: *xpub.public_key(),
            index,
            account,
            zone,
            change: self.addr_type.is_change(),
            status: AddressStatus::Unknown,
            derivation_path: self.derivation_path(),
            last_synced_block: None,
        };
        self.book.insert(info.clone())?;
        Ok(info)
    }

    /// run a gap-limit scan of `(account, zone)` against the injected
    /// scanner, deriving further addresses as the walk progresses
    pub fn scan<S: AddressScanner>(
        &mut self,
        root: &XPrv,
        account: u32,
        zone: Zone,
        scanner: &mut S,
    ) -> result::Result<usize, SyncError<S::Error>> {
        let node = self.change_node(root, account).map_err(SyncError::Wallet)?;
        let coin_type = self.coin_type;
        let change = self.addr_type.is_change();
        let path = self.derivation_path();
        self.book.scan_with(zone, account, scanner, |book| {
            let start = book.next_index(zone, account);
            let leaf = search_zone_address(&node, start, zone, coin_type)?;
            let info = QiAddressInfo {
                address: leaf.address,
                pub_key: *leaf.xpub.public_key(),
                index: leaf.index,
                account,
                zone,
                change,
                status: AddressStatus::Unknown,
                derivation_path: path.clone(),
                last_synced_block: None,
            };
            let address = info.address;
            book.insert(info)?;
            Ok(address)
        })
    }
}
