//! BIP-47 payment channel sub-wallets
//!
//! A channel to a counterparty payment code owns two address books:
//!
//! * the *self-receive* book: stealth addresses this wallet can spend,
//!   derived from our private payment code and the counterparty's
//!   public code;
//! * the *counterparty-send* book: the addresses we pay the
//!   counterparty at, derived the other way around.
//!
//! Both sides derive through a [`PaymentCodePrivate`] handle owned by
//! the facade; the channel itself stores only public material.

use std::result;

use secp256k1::PublicKey;

use crate::address::{is_qi_address, is_valid_address_for_zone, zone_of, Addr, Zone};
use crate::bip::bip44::MAX_DERIVATION_ATTEMPTS;
use crate::bip::bip47::{self, PaymentCode, PaymentCodePrivate};
use crate::config::CoinType;

use super::{
    AddressBook, AddressScanner, AddressStatus, DerivationPath, Error, QiAddressInfo, Result,
    SyncError,
};

pub struct PaymentChannel {
    counterparty: PaymentCode,
    // cached wire form: both books' derivation path and the channel key
    code: String,
    coin_type: CoinType,
    receive: AddressBook,
    send: AddressBook,
}

impl PaymentChannel {
    /// open a channel to the given counterparty; both sub-wallets come
    /// to life together
    pub fn new(counterparty: PaymentCode, coin_type: CoinType, gap_limit: u32) -> Self {
        PaymentChannel {
            code: counterparty.to_string(),
            counterparty,
            coin_type,
            receive: AddressBook::new(gap_limit),
            send: AddressBook::new(gap_limit),
        }
    }

    /// the counterparty payment code in wire form
    pub fn payment_code(&self) -> &str {
        &self.code
    }

    pub fn counterparty(&self) -> &PaymentCode {
        &self.counterparty
    }

    pub fn receive_book(&self) -> &AddressBook {
        &self.receive
    }

    pub fn send_book(&self) -> &AddressBook {
        &self.send
    }

    pub(crate) fn receive_book_mut(&mut self) -> &mut AddressBook {
        &mut self.receive
    }

    /// next stealth address the counterparty can pay us at
    pub fn next_receive_address(
        &mut self,
        ours: &PaymentCodePrivate,
        account: u32,
        zone: Zone,
    ) -> Result<QiAddressInfo> {
        let counterparty = self.counterparty;
        let code = self.code.clone();
        let coin_type = self.coin_type;
        Self::next_stealth(&mut self.receive, &code, coin_type, account, zone, |i| {
            ours.payment_address(&counterparty, i)
        })
    }

    /// next stealth address to pay the counterparty at
    pub fn next_send_address(
        &mut self,
        ours: &PaymentCodePrivate,
        account: u32,
        zone: Zone,
    ) -> Result<QiAddressInfo> {
        let counterparty = self.counterparty;
        let code = self.code.clone();
        let coin_type = self.coin_type;
        Self::next_stealth(&mut self.send, &code, coin_type, account, zone, |i| {
            ours.send_address(&counterparty, i)
        })
    }

    /// derive the self-receive stealth address directly at the given
    /// index and record it (serialization replay)
    pub fn add_receive_address(
        &mut self,
        ours: &PaymentCodePrivate,
        account: u32,
        index: u32,
    ) -> Result<QiAddressInfo> {
        if self.receive.contains_index(account, index) {
            return Err(Error::IndexInUse {
                account,
                change: false,
                index,
            });
        }
        let (address, pub_key) = ours.payment_address(&self.counterparty, index)?;
        if is_qi_address(&address) != (self.coin_type == CoinType::Qi) {
            return Err(Error::InvalidAddressZone(address));
        }
        let zone = zone_of(&address).ok_or(Error::InvalidAddressZone(address))?;
        let info = QiAddressInfo {
            address,
            pub_key,
            index,
            account,
            zone,
            change: false,
            status: AddressStatus::Unknown,
            derivation_path: DerivationPath::Bip47(self.code.clone()),
            last_synced_block: None,
        };
        self.receive.insert(info.clone())?;
        Ok(info)
    }

    /// gap-limit scan of the self-receive sequence
    pub fn scan_receive<S: AddressScanner>(
        &mut self,
        ours: &PaymentCodePrivate,
        account: u32,
        zone: Zone,
        scanner: &mut S,
    ) -> result::Result<usize, SyncError<S::Error>> {
        let counterparty = self.counterparty;
        let code = self.code.clone();
        let coin_type = self.coin_type;
        self.receive.scan_with(zone, account, scanner, |book| {
            let info = Self::next_stealth(book, &code, coin_type, account, zone, |i| {
                ours.payment_address(&counterparty, i)
            })?;
            Ok(info.address)
        })
    }

    fn next_stealth<D>(
        book: &mut AddressBook,
        code: &str,
        coin_type: CoinType,
        account: u32,
        zone: Zone,
        derive: D,
    ) -> Result<QiAddressInfo>
    where
        D: Fn(u32) -> bip47::Result<(Addr, PublicKey)>,
    {
        let mut index = book.next_index(zone, account);
        for _ in 0..MAX_DERIVATION_ATTEMPTS {
            let (address, pub_key) = derive(index)?;
            if is_valid_address_for_zone(coin_type, &address, zone) {
                let info = QiAddressInfo {
                    address,
                    pub_key,
                    index,
                    account,
                    zone,
                    change: false,
                    status: AddressStatus::Unknown,
                    derivation_path: DerivationPath::Bip47(code.to_owned()),
                    last_synced_block: None,
                };
                book.insert(info.clone())?;
                return Ok(info);
            }
            index += 1;
        }
        Err(Error::DerivationExhausted)
    }
}
