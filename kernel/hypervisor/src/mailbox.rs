//! Single-page message passing between VMs
//!
//! Every VM registers one send page and one receive page in its own memory.
//! Sending copies the sender's send page into the target's receive page, which then stays occupied until the target
//! clears it, so at most one message can be pending per VM.

use crate::hypervisor::Hypervisor;
use crate::memrange::Owner;
use crate::mm::{MapError, MapFlags, PageTable, Stage2};
use crate::vcpu::VcpuStatus;
use crate::vm::Vm;
use aarch64::mem::{AddrRange, IpAddr, Mode, PAddr, PAGESIZE};
use hypercall_abi::mailbox::MailboxReceiveReturn;
use hypercall_abi::MAILBOX_SIZE;
use thiserror_no_std::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum MailboxError {
    #[error("vm {0} does not exist")]
    InvalidVm(u32),
    #[error("mailbox pages must be page aligned")]
    Unaligned,
    #[error("send and receive page must be different pages")]
    SamePage,
    #[error("the mailbox is already configured")]
    AlreadyConfigured,
    #[error("a mailbox page is not mapped read-write for the vm")]
    NotAccessible,
    #[error("a mailbox page is not owned by the vm")]
    NotOwned,
    #[error("the sender has no mailbox configured")]
    SenderNotConfigured,
    #[error("the target has no mailbox configured")]
    NotConfigured,
    #[error("the target's mailbox still holds a message")]
    Full,
    #[error("a message can hold at most {MAILBOX_SIZE} bytes")]
    TooLarge,
    #[error("a vm cannot send a message to itself")]
    SelfSend,
    #[error("there is no message to clear")]
    NothingToClear,
    #[error("could not map the mailbox pages: {0}")]
    Map(#[from] MapError),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MailboxState {
    Empty,
    Full { sender: u32, size: u32 },
}

/// Physical addresses of the pages making up a mailbox.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MailboxPages {
    pub send: PAddr,
    pub recv: PAddr,
}

#[derive(Debug)]
pub struct Mailbox {
    pages: Option<MailboxPages>,
    state: MailboxState,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            pages: None,
            state: MailboxState::Empty,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.pages.is_some()
    }

    pub fn pages(&self) -> Option<MailboxPages> {
        self.pages
    }

    pub fn state(&self) -> MailboxState {
        self.state
    }

    /// The value a vCPU sees as the result of receiving from this mailbox.
    pub fn receive_return(&self) -> MailboxReceiveReturn {
        match self.state {
            MailboxState::Full { sender, size } => MailboxReceiveReturn::Message { sender, size },
            MailboxState::Empty => MailboxReceiveReturn::Empty,
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate a mailbox page of a VM and check that the VM can fully use it.
fn accessible_page(ptable: &PageTable<Stage2>, ipa: IpAddr) -> Result<PAddr, MailboxError> {
    // the address comes straight from the guest and may lie anywhere
    let range = AddrRange::checked_from_len(ipa, PAGESIZE as u64).ok_or(MailboxError::NotAccessible)?;
    let mode = ptable.get_mode(range).ok_or(MailboxError::NotAccessible)?;
    if !mode.contains(Mode::Read | Mode::Write) || mode.intersects(Mode::Invalid | Mode::Unowned) {
        return Err(MailboxError::NotAccessible);
    }
    ptable
        .translate(ipa)
        .map(|translation| translation.pa)
        .ok_or(MailboxError::NotAccessible)
}

fn page(pa: PAddr) -> AddrRange<PAddr> {
    AddrRange::from_len(pa, PAGESIZE as u64)
}

impl Hypervisor {
    fn mailbox_vm(&self, vm_id: u32) -> Result<&Vm, MailboxError> {
        self.vm(vm_id).ok_or(MailboxError::InvalidVm(vm_id))
    }

    /// Register the mailbox pages of VM `vm_id`, given as addresses in the VM's address space.
    ///
    /// On success the hypervisor maps the send page readable and the receive page writable for itself.
    pub fn configure_mailbox(&self, vm_id: u32, send: IpAddr, recv: IpAddr) -> Result<(), MailboxError> {
        let vm = self.mailbox_vm(vm_id)?;
        if !send.is_page_aligned() || !recv.is_page_aligned() {
            return Err(MailboxError::Unaligned);
        }
        if send == recv {
            return Err(MailboxError::SamePage);
        }

        let mut mailbox = vm.mailbox().spin_lock();
        if mailbox.is_configured() {
            return Err(MailboxError::AlreadyConfigured);
        }

        let pages = {
            let ptable = vm.ptable().spin_lock();
            MailboxPages {
                send: accessible_page(&ptable, send)?,
                recv: accessible_page(&ptable, recv)?,
            }
        };

        {
            let memory = self.memory().spin_lock();
            for pa in [pages.send, pages.recv] {
                if memory.owner_of(page(pa)) != Some(Owner::Vm(vm_id)) {
                    return Err(MailboxError::NotOwned);
                }
            }
        }

        {
            let mut stage1 = self.stage1().spin_lock();
            stage1.identity_map(page(pages.send), Mode::Read, MapFlags::empty())?;
            if let Err(e) = stage1.identity_map(page(pages.recv), Mode::Read | Mode::Write, MapFlags::empty()) {
                if stage1.identity_unmap(page(pages.send)).is_err() {
                    log::warn!("could not undo the mapping of {:?}", pages.send);
                }
                return Err(e.into());
            }
        }

        log::debug!("configured mailbox of vm {vm_id} with {pages:?}");
        mailbox.pages = Some(pages);
        Ok(())
    }

    /// Copy the first `size` bytes of `from`'s send page into the receive page of `to`.
    ///
    /// Returns the index of a vCPU of `to` that was waiting for the message and is now ready to run again.
    pub fn mailbox_send(&self, from: u32, to: u32, size: usize) -> Result<Option<u16>, MailboxError> {
        if size > MAILBOX_SIZE {
            return Err(MailboxError::TooLarge);
        }
        if from == to {
            return Err(MailboxError::SelfSend);
        }
        let sender = self.mailbox_vm(from)?;
        let target = self.mailbox_vm(to)?;

        // the pages of a configured mailbox never change so there is no need to keep the sender's lock
        let send_page = sender
            .mailbox()
            .spin_lock()
            .pages()
            .ok_or(MailboxError::SenderNotConfigured)?
            .send;

        {
            let mut mailbox = target.mailbox().spin_lock();
            let recv_page = mailbox.pages().ok_or(MailboxError::NotConfigured)?.recv;
            if mailbox.state != MailboxState::Empty {
                return Err(MailboxError::Full);
            }

            let phys_map = self.phys_map();
            // Safety: both pages are owned by different vms and mapped for the hypervisor since configuration
            unsafe {
                core::ptr::copy_nonoverlapping(
                    phys_map.map::<u8>(send_page),
                    phys_map.map::<u8>(recv_page),
                    size,
                )
            };
            mailbox.state = MailboxState::Full {
                sender: from,
                size: size as u32,
            };
        }
        log::trace!("delivered message of {size} bytes from vm {from} to vm {to}");

        Ok(self.wake_receiver(target))
    }

    /// Make the first vCPU of `vm` that waits for a message ready and hand it the pending message.
    ///
    /// vCPUs that are currently executing are skipped, they pick up the message when they next try to receive.
    fn wake_receiver(&self, vm: &Vm) -> Option<u16> {
        let message = vm.mailbox().spin_lock().receive_return();
        for lock in vm.vcpus() {
            let Ok(mut vcpu) = lock.try_lock() else {
                continue;
            };
            if vcpu.status == VcpuStatus::BlockedWaitingForMessage {
                vcpu.regs.set_retval(message.into());
                vcpu.status = VcpuStatus::Ready;
                log::trace!("woke up vcpu {} of vm {}", vcpu.index(), vcpu.vm_id());
                return Some(vcpu.index());
            }
        }
        None
    }

    /// The state of `vm_id`'s mailbox, which is left as it is.
    pub fn mailbox_receive(&self, vm_id: u32) -> Result<MailboxState, MailboxError> {
        Ok(self.mailbox_vm(vm_id)?.mailbox().spin_lock().state())
    }

    /// Mark the message pending for `vm_id` as consumed.
    pub fn mailbox_clear(&self, vm_id: u32) -> Result<(), MailboxError> {
        let vm = self.mailbox_vm(vm_id)?;
        let mut mailbox = vm.mailbox().spin_lock();
        match mailbox.state {
            MailboxState::Empty => Err(MailboxError::NothingToClear),
            MailboxState::Full { .. } => {
                mailbox.state = MailboxState::Empty;
                Ok(())
            }
        }
    }
}
