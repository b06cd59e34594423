//! The Qi HD wallet facade
//!
//! Aggregates the BIP-44 external/change sub-wallets and the BIP-47
//! payment channels behind one surface. Sub-wallets keep exclusive
//! ownership of their address state; the facade derives the shared key
//! material (the cached `m/44'/969'` node and per-account payment
//! codes) and dispatches.
//!
//! The wallet serializes to a stable, versioned structure holding the
//! mnemonic phrase, every spendable address record and the list of open
//! channels; restoring replays each record through the regular
//! derivation paths and cross-checks the outcome.

use std::result;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::address::{Addr, Zone};
use crate::bip::bip44::{self, AddrType, BIP44_PURPOSE};
use crate::bip::bip47::PaymentCodePrivate;
use crate::config::{CoinType, QI_COIN_TYPE};
use crate::hdwallet::{hardened, Seed, XPrv};

use super::{
    AddressScanner, Bip44Wallet, DerivationPath, Error, PaymentChannel, QiAddressInfo, Result,
    SyncError, DEFAULT_GAP_LIMIT,
};

/// version tag of the wallet serialization format
pub const WALLET_VERSION: u32 = 1;

/// The Qi HD wallet.
pub struct QiWallet {
    phrase: String,
    coin_type: CoinType,
    // cached m/44'/969' node, every derivation descends from here
    root: XPrv,
    external: Bip44Wallet,
    change: Bip44Wallet,
    // channels in the order they were opened
    channels: Vec<PaymentChannel>,
    gap_limit: u32,
}

/// The stable wire form of a wallet, see [`QiWallet::serialize`].
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedQiWallet {
    pub version: u32,
    pub phrase: String,
    pub coin_type: u32,
    pub addresses: Vec<QiAddressInfo>,
    pub channels: Vec<String>,
}

impl QiWallet {
    /// build a wallet from a BIP-39 mnemonic phrase
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        Self::from_mnemonic_with_gap_limit(phrase, DEFAULT_GAP_LIMIT)
    }

    pub fn from_mnemonic_with_gap_limit(phrase: &str, gap_limit: u32) -> Result<Self> {
        let mnemonic = bip39::Mnemonic::parse(phrase).map_err(Error::InvalidMnemonic)?;
        let seed = Seed::from_bytes(mnemonic.to_seed(""));
        let coin_type = CoinType::Qi;
        let root = XPrv::generate_from_seed(&seed)
            .and_then(|m| m.derive_path(&[BIP44_PURPOSE, hardened(coin_type.value())]))
            .map_err(bip44::Error::from)?;
        Ok(QiWallet {
            phrase: phrase.to_owned(),
            coin_type,
            root,
            external: Bip44Wallet::new(AddrType::External, coin_type, gap_limit),
            change: Bip44Wallet::new(AddrType::Internal, coin_type, gap_limit),
            channels: Vec::new(),
            gap_limit,
        })
    }

    pub fn coin_type(&self) -> CoinType {
        self.coin_type
    }

    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// our private payment code for the given account
    /// (the hardened node `m/44'/969'/account'`)
    fn payment_code_private(&self, account: u32) -> Result<PaymentCodePrivate> {
        let account = bip44::Account::new(account)?;
        let node = self
            .root
            .derive(account.hardened_index())
            .map_err(bip44::Error::from)?;
        Ok(PaymentCodePrivate::from_account_node(node))
    }

    /// our payment code for the given account, in wire form
    pub fn payment_code(&self, account: u32) -> Result<String> {
        Ok(self.payment_code_private(account)?.code().to_string())
    }

    /// open a payment channel to the given counterparty code
    ///
    /// Validates the code; opening an already open channel is a no-op,
    /// so the operation is idempotent and a channel is never observable
    /// half-open.
    pub fn open_channel(&mut self, code: &str) -> Result<()> {
        let counterparty = code.parse().map_err(Error::InvalidPaymentCode)?;
        if self.channel_is_open(code) {
            return Ok(());
        }
        debug!("opening payment channel {}", code);
        self.channels.push(PaymentChannel::new(
            counterparty,
            self.coin_type,
            self.gap_limit,
        ));
        Ok(())
    }

    pub fn channel_is_open(&self, code: &str) -> bool {
        self.channels.iter().any(|c| c.payment_code() == code)
    }

    fn channel_mut(&mut self, code: &str) -> Result<&mut PaymentChannel> {
        self.channels
            .iter_mut()
            .find(|c| c.payment_code() == code)
            .ok_or_else(|| Error::ChannelNotOpen(code.to_owned()))
    }

    /// next BIP-44 external address for `(account, zone)`
    pub fn next_address(&mut self, account: u32, zone: Zone) -> Result<QiAddressInfo> {
        self.external.next_address(&self.root, account, zone)
    }

    /// next BIP-44 change address for `(account, zone)`
    pub fn next_change_address(&mut self, account: u32, zone: Zone) -> Result<QiAddressInfo> {
        self.change.next_address(&self.root, account, zone)
    }

    /// record the external address at an exact child index
    ///
    /// Fails with [`Error::IndexInUse`] when the sub-wallet already
    /// stores an address at this `(account, index)`.
    pub fn add_address(&mut self, account: u32, index: u32) -> Result<QiAddressInfo> {
        self.external.add_address(&self.root, account, index)
    }

    /// record the change address at an exact child index
    pub fn add_change_address(&mut self, account: u32, index: u32) -> Result<QiAddressInfo> {
        self.change.add_address(&self.root, account, index)
    }

    /// next self-receive stealth address on the channel to `code`
    pub fn next_receive_address(
        &mut self,
        code: &str,
        account: u32,
        zone: Zone,
    ) -> Result<QiAddressInfo> {
        let ours = self.payment_code_private(account)?;
        self.channel_mut(code)?
            .next_receive_address(&ours, account, zone)
    }

    /// next stealth address for sending to the counterparty of `code`
    pub fn next_send_address(
        &mut self,
        code: &str,
        account: u32,
        zone: Zone,
    ) -> Result<QiAddressInfo> {
        let ours = self.payment_code_private(account)?;
        self.channel_mut(code)?
            .next_send_address(&ours, account, zone)
    }

    /// look an address up across every sub-wallet
    pub fn address_info(&self, addr: &Addr) -> Option<&QiAddressInfo> {
        self.books().find_map(|book| book.get(addr))
    }

    /// every stored record for the account, in the fixed sub-wallet
    /// order (external, change, then channels as opened)
    pub fn addresses_for_account(&self, account: u32) -> Vec<&QiAddressInfo> {
        self.books()
            .flat_map(|book| book.iter())
            .filter(|a| a.account == account)
            .collect()
    }

    /// every stored record for the zone, in the fixed sub-wallet order
    pub fn addresses_for_zone(&self, zone: Zone) -> Vec<&QiAddressInfo> {
        self.books()
            .flat_map(|book| book.iter())
            .filter(|a| a.zone == zone)
            .collect()
    }

    // union view over the sub-wallet books, in the fixed order
    fn books(&self) -> impl Iterator<Item = &super::AddressBook> {
        std::iter::once(self.external.book())
            .chain(std::iter::once(self.change.book()))
            .chain(
                self.channels
                    .iter()
                    .flat_map(|c| vec![c.receive_book(), c.send_book()]),
            )
    }

    /// reconcile the spendable address books of `(account, zone)`
    /// against the injected scanner, respecting each sub-wallet's gap
    /// limit
    pub fn sync_account<S: AddressScanner>(
        &mut self,
        scanner: &mut S,
        account: u32,
        zone: Zone,
    ) -> result::Result<usize, SyncError<S::Error>> {
        let mut probed = self.external.scan(&self.root, account, zone, scanner)?;
        probed += self.change.scan(&self.root, account, zone, scanner)?;
        let ours = self.payment_code_private(account)?;
        for channel in self.channels.iter_mut() {
            probed += channel.scan_receive(&ours, account, zone, scanner)?;
        }
        Ok(probed)
    }

    /// the stable wire form of the wallet
    ///
    /// Only spendable records are persisted: the BIP-44 chains and the
    /// self-receive side of every channel. Counterparty-send records
    /// are re-derivable session state.
    pub fn serialize(&self) -> SerializedQiWallet {
        let mut addresses: Vec<QiAddressInfo> = Vec::new();
        addresses.extend(self.external.book().iter().cloned());
        addresses.extend(self.change.book().iter().cloned());
        for channel in self.channels.iter() {
            addresses.extend(channel.receive_book().iter().cloned());
        }
        SerializedQiWallet {
            version: WALLET_VERSION,
            phrase: self.phrase.clone(),
            coin_type: self.coin_type.value(),
            addresses,
            channels: self
                .channels
                .iter()
                .map(|c| c.payment_code().to_owned())
                .collect(),
        }
    }

    /// restore a wallet from its wire form
    ///
    /// Every address record is replayed through the regular derivation
    /// path selected by its `derivationPath`; any disagreement between
    /// the re-derived key material and the stored record fails with
    /// [`Error::ImportMismatch`].
    pub fn deserialize(data: &SerializedQiWallet) -> Result<Self> {
        if data.version != WALLET_VERSION {
            return Err(Error::UnsupportedVersion(data.version));
        }
        if data.coin_type != QI_COIN_TYPE {
            return Err(Error::WrongCoinType(data.coin_type));
        }

        let mut wallet = QiWallet::from_mnemonic(&data.phrase)?;
        for code in data.channels.iter() {
            wallet.open_channel(code)?;
        }

        for stored in data.addresses.iter() {
            let replayed = match &stored.derivation_path {
                DerivationPath::Bip44External => {
                    wallet
                        .external
                        .add_address(&wallet.root, stored.account, stored.index)?
                }
                DerivationPath::Bip44Change => {
                    wallet
                        .change
                        .add_address(&wallet.root, stored.account, stored.index)?
                }
                DerivationPath::Bip47(code) => {
                    let ours = wallet.payment_code_private(stored.account)?;
                    wallet
                        .channel_mut(code)?
                        .add_receive_address(&ours, stored.account, stored.index)?
                }
            };
            if replayed.address != stored.address
                || replayed.pub_key != stored.pub_key
                || replayed.zone != stored.zone
            {
                return Err(Error::ImportMismatch {
                    address: stored.address,
                });
            }
            // the lifecycle state is not re-derivable, restore it as-is
            let book = match &stored.derivation_path {
                DerivationPath::Bip44External => wallet.external.book_mut(),
                DerivationPath::Bip44Change => wallet.change.book_mut(),
                DerivationPath::Bip47(code) => wallet.channel_mut(code)?.receive_book_mut(),
            };
            book.mark(
                &stored.address,
                stored.status,
                stored.last_synced_block.clone(),
            );
        }
        Ok(wallet)
    }
}
